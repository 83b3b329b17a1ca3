// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Record types for the local encrypted store.
//!
//! [`StoredRecord`] is the at-rest form (content sealed). [`DataRecord`] is
//! what callers see after decryption; content that cannot be opened is
//! surfaced as [`RecordContent::Undecryptable`] instead of failing the read.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Where a record came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    #[default]
    User,
    Bland,
    Import,
    Llm,
}

fn first_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    /// Namespace the record belongs to.
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "first_version")]
    pub version: u32,
    #[serde(default)]
    pub source: RecordSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RecordMetadata {
    pub fn new(user_id: impl Into<String>, source: RecordSource, now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            user_id: user_id.into(),
            version: 1,
            source,
            deleted_at: None,
        }
    }
}

impl Default for RecordMetadata {
    fn default() -> Self {
        Self::new(String::new(), RecordSource::User, DateTime::<Utc>::default())
    }
}

// =============================================================================
// At-Rest Form
// =============================================================================

/// Content as written to disk: sealed string, or legacy plaintext JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredContent {
    Sealed(String),
    Plain(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub date: NaiveDate,
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    pub content: StoredContent,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: RecordMetadata,
}

impl StoredRecord {
    pub fn is_deleted(&self) -> bool {
        self.metadata.deleted_at.is_some()
    }

    /// Key enforcing one live record per `(date, category, subcategory)`.
    pub fn unique_key(&self) -> String {
        serde_json::Value::from(vec![
            self.date.to_string(),
            self.category.clone(),
            self.subcategory.clone(),
        ])
        .to_string()
    }
}

// =============================================================================
// Caller-Facing Form
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum RecordContent {
    /// Sealed content that opened with the session key.
    Decrypted(Value),
    /// Stored without encryption (legacy rows, higher-capability store).
    Plaintext(Value),
    /// Sealed content that did not open; the ciphertext is passed through.
    Undecryptable(String),
}

impl RecordContent {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Decrypted(v) | Self::Plaintext(v) => Some(v),
            Self::Undecryptable(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataRecord {
    pub id: RecordId,
    pub date: NaiveDate,
    pub category: String,
    pub subcategory: String,
    pub content: RecordContent,
    pub tags: Vec<String>,
    pub metadata: RecordMetadata,
}

impl DataRecord {
    pub fn is_deleted(&self) -> bool {
        self.metadata.deleted_at.is_some()
    }
}

/// Input for a new record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewRecord {
    pub date: NaiveDate,
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    pub content: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: RecordSource,
}

impl NewRecord {
    pub fn new(
        date: NaiveDate,
        category: impl Into<String>,
        subcategory: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            date,
            category: category.into(),
            subcategory: subcategory.into(),
            content,
            tags: Vec::new(),
            source: RecordSource::User,
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: RecordSource) -> Self {
        self.source = source;
        self
    }
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub content: Option<Value>,
    pub tags: Option<Vec<String>>,
}

// =============================================================================
// Filters
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// Inclusive bounds.
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Matches records carrying any of these tags.
    pub tags: Vec<String>,
    pub include_deleted: bool,
}

impl RecordFilter {
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Self::default()
        }
    }

    pub fn with_subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn matches(
        &self,
        date: NaiveDate,
        category: &str,
        subcategory: &str,
        tags: &[String],
        deleted: bool,
    ) -> bool {
        if deleted && !self.include_deleted {
            return false;
        }
        if self.category.as_deref().is_some_and(|c| c != category) {
            return false;
        }
        if self.subcategory.as_deref().is_some_and(|s| s != subcategory) {
            return false;
        }
        if self.date_from.is_some_and(|from| date < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| date > to) {
            return false;
        }
        self.tags.is_empty() || self.tags.iter().any(|t| tags.contains(t))
    }
}

/// Options for bulk export of a date range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportOptions {
    /// Restrict to these categories; empty means all.
    pub categories: Vec<String>,
    pub include_deleted: bool,
}
