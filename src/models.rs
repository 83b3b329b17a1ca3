// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the local HTTP surface. Domain types that
//! already serialize the way the API needs them (`SaveOutcome`, `SearchHit`,
//! `DrainReport`, `HealthReport`, `SessionState`) are returned directly.
//!
//! ## Model Categories
//!
//! - **Session**: login, status, activity
//! - **Records**: create and list

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::session::SessionState;
use crate::storage::{DataRecord, NewRecord, RecordContent, RecordSource};

// =============================================================================
// Session Models
// =============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// The user's PIN. Never logged or persisted in clear.
    pub secret: String,
    /// Keep a device-bound blob for silent restoration.
    #[serde(default)]
    pub remember: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SessionResponse {
    pub state: SessionState,
    /// PIN with all but its last two characters masked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_hint: Option<String>,
    /// Session token present in short-lived storage.
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LoginResponse {
    /// Storage namespace of the logged-in user.
    pub namespace: String,
    pub session: SessionResponse,
}

// =============================================================================
// Record Models
// =============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateRecordRequest {
    pub date: NaiveDate,
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[schema(value_type = Object)]
    pub content: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: RecordSource,
}

impl From<CreateRecordRequest> for NewRecord {
    fn from(request: CreateRecordRequest) -> Self {
        NewRecord::new(request.date, request.category, request.subcategory, request.content)
            .with_tags(request.tags)
            .with_source(request.source)
    }
}

/// Content as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Decrypted,
    Plaintext,
    /// Did not open with the session key; `ciphertext` is set instead of `value`.
    Undecryptable,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RecordResponse {
    pub id: String,
    pub date: NaiveDate,
    pub category: String,
    pub subcategory: String,
    pub status: ContentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    pub tags: Vec<String>,
    pub source: RecordSource,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<DataRecord> for RecordResponse {
    fn from(record: DataRecord) -> Self {
        let (status, value, ciphertext) = match record.content {
            RecordContent::Decrypted(v) => (ContentStatus::Decrypted, Some(v), None),
            RecordContent::Plaintext(v) => (ContentStatus::Plaintext, Some(v), None),
            RecordContent::Undecryptable(c) => (ContentStatus::Undecryptable, None, Some(c)),
        };
        Self {
            id: record.id.to_string(),
            date: record.date,
            category: record.category,
            subcategory: record.subcategory,
            status,
            value,
            ciphertext,
            tags: record.tags,
            source: record.metadata.source,
            version: record.metadata.version,
            created_at: record.metadata.created_at,
            updated_at: record.metadata.updated_at,
            deleted_at: record.metadata.deleted_at,
        }
    }
}
