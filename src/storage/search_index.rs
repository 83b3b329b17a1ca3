// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Inverted token index over record content, scoped to one namespace.
//!
//! Postings are appended on every write and dropped when their record is
//! deleted. They point at record ids; callers resolve them against the stores
//! when presenting results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::namespace_db::{NamespaceDb, StoreResult};
use super::records::RecordId;

/// Tokens shorter than this are not indexed.
pub const MIN_TOKEN_LEN: usize = 3;

/// Per-record cap on indexed tokens.
pub const MAX_TOKENS_PER_RECORD: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchToken {
    pub token: String,
    pub record_id: RecordId,
    /// Category of the indexed record.
    pub record_type: String,
    pub weight: f32,
    pub updated_at: DateTime<Utc>,
}

/// Split content into lowercase word tokens.
///
/// Non-string values are indexed through their JSON text. Splits on any
/// character outside `[A-Za-z0-9_]`, keeps tokens of at least
/// [`MIN_TOKEN_LEN`] characters and at most [`MAX_TOKENS_PER_RECORD`] of them.
pub fn tokenize(content: &Value) -> Vec<String> {
    let text = match content {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    };
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .take(MAX_TOKENS_PER_RECORD)
        .map(str::to_string)
        .collect()
}

#[derive(Clone)]
pub struct SearchIndex {
    db: Arc<NamespaceDb>,
}

impl SearchIndex {
    pub fn new(db: Arc<NamespaceDb>) -> Self {
        Self { db }
    }

    /// Add one posting.
    pub fn update(&self, token: &str, record_id: &RecordId, record_type: &str) -> StoreResult<()> {
        let posting = SearchToken {
            token: token.to_lowercase(),
            record_id: record_id.clone(),
            record_type: record_type.to_string(),
            weight: 1.0,
            updated_at: Utc::now(),
        };
        self.db
            .insert_tokens(&[(posting.token.clone(), serde_json::to_vec(&posting)?)])
    }

    /// Tokenize `content` and add a posting per token in one transaction.
    pub fn index_record(
        &self,
        record_id: &RecordId,
        record_type: &str,
        content: &Value,
    ) -> StoreResult<usize> {
        let now = Utc::now();
        let mut rows = Vec::new();
        for token in tokenize(content) {
            let posting = SearchToken {
                token: token.clone(),
                record_id: record_id.clone(),
                record_type: record_type.to_string(),
                weight: 1.0,
                updated_at: now,
            };
            rows.push((token, serde_json::to_vec(&posting)?));
        }
        self.db.insert_tokens(&rows)?;
        Ok(rows.len())
    }

    /// Drop every posting for `record_id`. Returns how many were removed.
    pub fn remove_record(&self, record_id: &RecordId) -> StoreResult<usize> {
        self.db.replace_tokens(
            |bytes| {
                serde_json::from_slice::<SearchToken>(bytes)
                    .is_ok_and(|posting| &posting.record_id == record_id)
            },
            &[],
        )
    }

    /// Postings for an exact (case-insensitive) token.
    pub fn search(&self, term: &str) -> StoreResult<Vec<SearchToken>> {
        let mut out = Vec::new();
        for bytes in self.db.tokens_for(&term.to_lowercase())? {
            match serde_json::from_slice(&bytes) {
                Ok(posting) => out.push(posting),
                Err(e) => warn!(term, error = %e, "Skipping unreadable search posting"),
            }
        }
        Ok(out)
    }
}
