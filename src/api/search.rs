// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    error::ApiError,
    router::{SearchHit, SearchOptions},
    state::AppState,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct SearchQuery {
    /// Free-text query.
    pub q: String,
    /// Maximum number of hits (capped at 50).
    pub limit: Option<usize>,
    /// Comma-separated record types to restrict the search to.
    pub categories: Option<String>,
}

impl SearchQuery {
    fn options(&self) -> SearchOptions {
        let categories = self
            .categories
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        SearchOptions {
            limit: self.limit,
            categories,
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/search",
    params(SearchQuery),
    tag = "Search",
    responses(
        (status = 200, body = [SearchHit]),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let hits = state.vault.search(&params.q, &params.options()).await?;
    Ok(Json(hits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{categories, HitSource};
    use crate::storage::NewRecord;
    use crate::testing::test_state;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn categories_are_split_and_trimmed() {
        let query = SearchQuery {
            q: "x".into(),
            limit: Some(5),
            categories: Some("NOTES, SETTINGS,,".into()),
        };
        let options = query.options();
        assert_eq!(options.categories, vec!["NOTES".to_string(), "SETTINGS".to_string()]);
        assert_eq!(options.limit, Some(5));
    }

    #[tokio::test]
    async fn finds_saved_records() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.vault.login("4471", false).await.unwrap();
        let saved = state
            .vault
            .save(NewRecord::new(
                "2025-06-16".parse().unwrap(),
                categories::SETTINGS,
                "settings",
                json!({ "theme": "midnight" }),
            ))
            .await
            .unwrap();

        let Json(hits) = search(
            State(state),
            Query(SearchQuery {
                q: "midnight".into(),
                ..SearchQuery::default()
            }),
        )
        .await
        .expect("search succeeds");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, saved.record_id);
        assert_eq!(hits[0].source, HitSource::Index);
    }

    #[tokio::test]
    async fn requires_login() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let err = search(
            State(state),
            Query(SearchQuery {
                q: "anything".into(),
                ..SearchQuery::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }
}
