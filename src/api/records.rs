// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    error::ApiError,
    models::{CreateRecordRequest, RecordResponse},
    router::SaveOutcome,
    state::AppState,
    storage::{RecordFilter, RecordId},
};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListRecordsQuery {
    /// Category; selects which store answers. Omitted means the local store.
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// Inclusive lower date bound.
    pub from: Option<NaiveDate>,
    /// Inclusive upper date bound.
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl From<ListRecordsQuery> for RecordFilter {
    fn from(query: ListRecordsQuery) -> Self {
        RecordFilter {
            category: query.category,
            subcategory: query.subcategory,
            date_from: query.from,
            date_to: query.to,
            tags: Vec::new(),
            include_deleted: query.include_deleted,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DeleteRecordQuery {
    /// Category of the record, used to route the delete.
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
}

#[utoipa::path(
    post,
    path = "/v1/records",
    request_body = CreateRecordRequest,
    tag = "Records",
    responses(
        (status = 201, body = SaveOutcome),
        (status = 401, description = "Not logged in"),
        (status = 409, description = "A live record already exists for this date, category and subcategory")
    )
)]
pub async fn create_record(
    State(state): State<AppState>,
    Json(request): Json<CreateRecordRequest>,
) -> Result<(StatusCode, Json<SaveOutcome>), ApiError> {
    if request.category.trim().is_empty() {
        return Err(ApiError::bad_request("category must not be empty"));
    }
    let outcome = state.vault.save(request.into()).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[utoipa::path(
    get,
    path = "/v1/records",
    params(ListRecordsQuery),
    tag = "Records",
    responses(
        (status = 200, body = [RecordResponse]),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn list_records(
    State(state): State<AppState>,
    Query(params): Query<ListRecordsQuery>,
) -> Result<Json<Vec<RecordResponse>>, ApiError> {
    let records = state.vault.query(&params.into()).await?;
    Ok(Json(records.into_iter().map(RecordResponse::from).collect()))
}

#[utoipa::path(
    delete,
    path = "/v1/records/{record_id}",
    params(
        ("record_id" = String, Path, description = "Identifier of the record to delete"),
        DeleteRecordQuery
    ),
    tag = "Records",
    responses(
        (status = 200, body = SaveOutcome),
        (status = 404, description = "No such record")
    )
)]
pub async fn delete_record(
    Path(record_id): Path<String>,
    State(state): State<AppState>,
    Query(params): Query<DeleteRecordQuery>,
) -> Result<Json<SaveOutcome>, ApiError> {
    let outcome = state
        .vault
        .delete(&RecordId::from(record_id), &params.category, &params.subcategory)
        .await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::StoreTarget;
    use crate::testing::test_state;
    use serde_json::json;

    fn request(date: &str) -> CreateRecordRequest {
        CreateRecordRequest {
            date: date.parse().unwrap(),
            category: "SETTINGS".into(),
            subcategory: "settings".into(),
            content: json!({ "theme": "dark" }),
            tags: vec!["ui".into()],
            source: Default::default(),
        }
    }

    fn settings_query() -> ListRecordsQuery {
        ListRecordsQuery {
            category: Some("SETTINGS".into()),
            ..ListRecordsQuery::default()
        }
    }

    #[tokio::test]
    async fn requires_login() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let err = create_record(State(state), Json(request("2025-06-16")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.vault.login("4471", false).await.unwrap();

        let (status, Json(outcome)) = create_record(State(state.clone()), Json(request("2025-06-16")))
            .await
            .expect("record creation succeeds");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(outcome.target, StoreTarget::Local);

        let Json(records) = list_records(State(state.clone()), Query(settings_query()))
            .await
            .expect("listing succeeds");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, Some(json!({ "theme": "dark" })));
        assert_eq!(records[0].tags, vec!["ui".to_string()]);

        delete_record(
            Path(outcome.record_id.to_string()),
            State(state.clone()),
            Query(DeleteRecordQuery {
                category: "SETTINGS".into(),
                subcategory: "settings".into(),
            }),
        )
        .await
        .expect("deletion succeeds");

        let Json(records) = list_records(State(state), Query(settings_query()))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn duplicate_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.vault.login("4471", false).await.unwrap();

        create_record(State(state.clone()), Json(request("2025-06-16")))
            .await
            .unwrap();
        let err = create_record(State(state), Json(request("2025-06-16")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn deleting_unknown_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.vault.login("4471", false).await.unwrap();

        let err = delete_record(
            Path("missing".into()),
            State(state),
            Query(DeleteRecordQuery {
                category: "SETTINGS".into(),
                subcategory: "settings".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
