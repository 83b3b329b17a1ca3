// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Merging and ranking for universal search.
//!
//! Candidates come from the token index first, then from the
//! higher-capability store's native search. The first candidate seen for a
//! record wins. Candidates with text are scored by how often the query terms
//! occur in it; index-only candidates by how many term postings they have.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use utoipa::ToSchema;

use crate::storage::records::RecordId;

/// Hard cap on returned hits.
pub const MAX_RESULTS: usize = 50;

/// Query terms shorter than this are ignored.
const MIN_TERM_LEN: usize = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Requested result count, clamped to [`MAX_RESULTS`].
    pub limit: Option<usize>,
    /// Restrict to these record types; empty means all.
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    Index,
    Native,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SearchHit {
    #[schema(value_type = String)]
    pub record_id: RecordId,
    pub record_type: String,
    pub score: u32,
    pub source: HitSource,
}

/// A raw match before deduplication.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub record_id: RecordId,
    pub record_type: String,
    pub text: Option<String>,
    pub source: HitSource,
}

/// Lowercased whitespace-separated terms long enough to be indexed.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.len() >= MIN_TERM_LEN)
        .map(str::to_string)
        .collect()
}

pub(crate) fn rank(
    candidates: Vec<Candidate>,
    terms: &[String],
    options: &SearchOptions,
) -> Vec<SearchHit> {
    let mut postings: HashMap<RecordId, u32> = HashMap::new();
    for c in candidates.iter().filter(|c| c.source == HitSource::Index) {
        *postings.entry(c.record_id.clone()).or_default() += 1;
    }

    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    for candidate in candidates {
        if !seen.insert(candidate.record_id.clone()) {
            continue;
        }
        if !options.categories.is_empty() && !options.categories.contains(&candidate.record_type)
        {
            continue;
        }
        let score = match &candidate.text {
            Some(text) => {
                let text = text.to_lowercase();
                terms
                    .iter()
                    .map(|term| text.matches(term.as_str()).count() as u32)
                    .sum()
            }
            None => postings.get(&candidate.record_id).copied().unwrap_or(0),
        };
        hits.push(SearchHit {
            record_id: candidate.record_id,
            record_type: candidate.record_type,
            score,
            source: candidate.source,
        });
    }

    // Stable: equal scores keep discovery order
    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits.truncate(options.limit.unwrap_or(MAX_RESULTS).min(MAX_RESULTS));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(id: &str, kind: &str) -> Candidate {
        Candidate {
            record_id: RecordId::from(id),
            record_type: kind.into(),
            text: None,
            source: HitSource::Index,
        }
    }

    fn native(id: &str, kind: &str, text: &str) -> Candidate {
        Candidate {
            record_id: RecordId::from(id),
            record_type: kind.into(),
            text: Some(text.into()),
            source: HitSource::Native,
        }
    }

    fn terms(q: &str) -> Vec<String> {
        query_terms(q)
    }

    #[test]
    fn short_terms_are_dropped() {
        assert_eq!(query_terms("MRI of my Knee"), vec!["mri", "knee"]);
        assert!(query_terms("a an").is_empty());
    }

    #[test]
    fn duplicates_keep_first_candidate() {
        let hits = rank(
            vec![
                index("a", "MEDICAL_TIMELINE"),
                native("a", "MEDICAL_TIMELINE", "knee knee knee"),
            ],
            &terms("knee"),
            &SearchOptions::default(),
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, HitSource::Index);
        assert_eq!(hits[0].score, 1);
    }

    #[test]
    fn results_sort_by_score() {
        let hits = rank(
            vec![
                native("low", "X", "knee"),
                native("high", "X", "Knee surgery on the knee"),
                index("idx", "X"),
                index("idx", "X"),
                index("idx", "X"),
            ],
            &terms("knee surgery"),
            &SearchOptions::default(),
        );
        let order: Vec<_> = hits.iter().map(|h| h.record_id.as_str()).collect();
        assert_eq!(order, vec!["high", "idx", "low"]);
        assert_eq!(hits[0].score, 3);
        assert_eq!(hits[1].score, 3);
    }

    #[test]
    fn limit_and_categories_apply() {
        let candidates: Vec<_> = (0..80)
            .map(|i| index(&format!("r{i}"), if i % 2 == 0 { "A" } else { "B" }))
            .collect();

        let capped = rank(candidates.clone(), &terms("anything"), &SearchOptions::default());
        assert_eq!(capped.len(), MAX_RESULTS);

        let limited = rank(
            candidates.clone(),
            &terms("anything"),
            &SearchOptions {
                limit: Some(500),
                categories: vec!["A".into()],
            },
        );
        assert_eq!(limited.len(), 40);
        assert!(limited.iter().all(|h| h.record_type == "A"));

        let small = rank(
            candidates,
            &terms("anything"),
            &SearchOptions {
                limit: Some(5),
                categories: vec![],
            },
        );
        assert_eq!(small.len(), 5);
    }
}
