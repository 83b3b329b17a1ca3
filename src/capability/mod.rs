// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Higher-Capability Store
//!
//! An optional structured store that holds medical entities in plaintext,
//! partitioned by namespace. It may be missing or fail at runtime; the
//! router falls back to the outbox whenever it does.
//!
//! - [`probe`] - memoized availability detection per session
//! - [`medical_db`] - redb-backed implementation
//!
//! Entities are typed ([`Entity`]) and every write is expressed as an
//! [`Operation`] so the same value can be applied directly or queued.

pub mod medical_db;
pub mod probe;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::crypto::Namespace;
use crate::storage::namespace_db::StoreError;
use crate::storage::records::{
    DataRecord, NewRecord, RecordContent, RecordFilter, RecordId, RecordMetadata, RecordSource,
};

pub use medical_db::{MedicalDatabase, MedicalDatabaseConnector};
pub use probe::CapabilityProbe;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("higher-capability store unavailable: {0}")]
    Unavailable(String),

    #[error("store does not implement ping")]
    PingUnsupported,

    #[error("store operation failed: {0}")]
    Backend(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// Entities
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum EntityKind {
    MedicalEvent,
    Provider,
    Appointment,
    GenericRecord,
}

/// Plaintext record as held by the higher-capability store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub id: RecordId,
    pub date: NaiveDate,
    pub category: String,
    pub subcategory: String,
    pub content: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: RecordSource,
    pub created_at: DateTime<Utc>,
}

impl RecordDraft {
    pub fn from_new(id: RecordId, record: NewRecord, now: DateTime<Utc>) -> Self {
        Self {
            id,
            date: record.date,
            category: record.category,
            subcategory: record.subcategory,
            content: record.content,
            tags: record.tags,
            source: record.source,
            created_at: now,
        }
    }

    /// View as a caller-facing record. Content is plaintext.
    pub fn into_record(self, user_id: &str) -> DataRecord {
        let mut metadata = RecordMetadata::new(user_id, self.source, self.created_at);
        metadata.updated_at = self.created_at;
        DataRecord {
            id: self.id,
            date: self.date,
            category: self.category,
            subcategory: self.subcategory,
            content: RecordContent::Plaintext(self.content),
            tags: self.tags,
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    MedicalEvent(RecordDraft),
    Provider(RecordDraft),
    Appointment(RecordDraft),
    GenericRecord(RecordDraft),
}

impl Entity {
    pub fn new(kind: EntityKind, draft: RecordDraft) -> Self {
        match kind {
            EntityKind::MedicalEvent => Self::MedicalEvent(draft),
            EntityKind::Provider => Self::Provider(draft),
            EntityKind::Appointment => Self::Appointment(draft),
            EntityKind::GenericRecord => Self::GenericRecord(draft),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::MedicalEvent(_) => EntityKind::MedicalEvent,
            Self::Provider(_) => EntityKind::Provider,
            Self::Appointment(_) => EntityKind::Appointment,
            Self::GenericRecord(_) => EntityKind::GenericRecord,
        }
    }

    pub fn draft(&self) -> &RecordDraft {
        match self {
            Self::MedicalEvent(d)
            | Self::Provider(d)
            | Self::Appointment(d)
            | Self::GenericRecord(d) => d,
        }
    }
}

/// A write against the higher-capability store.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Save(Entity),
    Update(Entity),
    Delete { kind: EntityKind, id: RecordId },
}

impl Operation {
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            Self::Save(e) | Self::Update(e) => e.kind(),
            Self::Delete { kind, .. } => *kind,
        }
    }

    pub fn record_id(&self) -> &RecordId {
        match self {
            Self::Save(e) | Self::Update(e) => &e.draft().id,
            Self::Delete { id, .. } => id,
        }
    }

    /// Wire name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Save(_) => "save",
            Self::Update(_) => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// A match returned by a store's native search.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeHit {
    pub record_id: RecordId,
    pub record_type: String,
    pub text: String,
}

// =============================================================================
// Store Traits
// =============================================================================

#[async_trait]
pub trait CapabilityStore: Send + Sync {
    /// Liveness check. Stores without one report `PingUnsupported`, which the
    /// probe treats as unavailable.
    async fn ping(&self) -> Result<(), CapabilityError> {
        Err(CapabilityError::PingUnsupported)
    }

    async fn save_medical_event(&self, draft: &RecordDraft) -> Result<(), CapabilityError>;
    async fn save_provider(&self, draft: &RecordDraft) -> Result<(), CapabilityError>;
    async fn save_appointment(&self, draft: &RecordDraft) -> Result<(), CapabilityError>;
    async fn save_generic(&self, draft: &RecordDraft) -> Result<(), CapabilityError>;

    async fn delete_entity(&self, kind: EntityKind, id: &RecordId) -> Result<(), CapabilityError>;

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<RecordDraft>, CapabilityError>;

    /// Native full-text search; `None` when the store has none.
    async fn search(&self, _query: &str) -> Result<Option<Vec<NativeHit>>, CapabilityError> {
        Ok(None)
    }

    async fn count(&self) -> Result<u64, CapabilityError>;
}

/// Opens the higher-capability store for a namespace.
#[async_trait]
pub trait CapabilityConnector: Send + Sync {
    async fn connect(
        &self,
        namespace: &Namespace,
    ) -> Result<Arc<dyn CapabilityStore>, CapabilityError>;
}

/// Connector for environments without a higher-capability store.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledConnector;

#[async_trait]
impl CapabilityConnector for DisabledConnector {
    async fn connect(
        &self,
        _namespace: &Namespace,
    ) -> Result<Arc<dyn CapabilityStore>, CapabilityError> {
        Err(CapabilityError::Unavailable(
            "higher-capability store disabled".into(),
        ))
    }
}

/// Apply one operation, dispatching on entity kind.
pub async fn apply(store: &dyn CapabilityStore, op: &Operation) -> Result<(), CapabilityError> {
    match op {
        Operation::Save(entity) | Operation::Update(entity) => match entity {
            Entity::MedicalEvent(d) => store.save_medical_event(d).await,
            Entity::Provider(d) => store.save_provider(d).await,
            Entity::Appointment(d) => store.save_appointment(d).await,
            Entity::GenericRecord(d) => store.save_generic(d).await,
        },
        Operation::Delete { kind, id } => store.delete_entity(*kind, id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryCapabilityStore;
    use serde_json::json;

    fn draft() -> RecordDraft {
        RecordDraft::from_new(
            RecordId::new(),
            NewRecord::new(
                "2025-06-16".parse().unwrap(),
                "MEDICAL_TIMELINE",
                "medical-events",
                json!({ "title": "Checkup" }),
            ),
            Utc::now(),
        )
    }

    #[test]
    fn operation_reports_kind_and_name() {
        let d = draft();
        let save = Operation::Save(Entity::new(EntityKind::Provider, d.clone()));
        assert_eq!(save.entity_kind(), EntityKind::Provider);
        assert_eq!(save.name(), "save");
        assert_eq!(save.record_id(), &d.id);

        let delete = Operation::Delete {
            kind: EntityKind::Appointment,
            id: d.id.clone(),
        };
        assert_eq!(delete.entity_kind(), EntityKind::Appointment);
        assert_eq!(delete.name(), "delete");
    }

    #[tokio::test]
    async fn apply_dispatches_by_kind() {
        let store = MemoryCapabilityStore::available();
        let d = draft();

        apply(&*store, &Operation::Save(Entity::new(EntityKind::MedicalEvent, d.clone())))
            .await
            .unwrap();
        assert_eq!(store.kinds_of(&d.id), vec![EntityKind::MedicalEvent]);

        apply(
            &*store,
            &Operation::Delete {
                kind: EntityKind::MedicalEvent,
                id: d.id.clone(),
            },
        )
        .await
        .unwrap();
        assert!(store.kinds_of(&d.id).is_empty());
    }

    #[tokio::test]
    async fn disabled_connector_never_connects() {
        let ns = Namespace::parse("pinvault_0123456789abcdef01234567").unwrap();
        assert!(matches!(
            DisabledConnector.connect(&ns).await,
            Err(CapabilityError::Unavailable(_))
        ));
    }

    #[test]
    fn draft_becomes_plaintext_record() {
        let d = draft();
        let record = d.clone().into_record("pinvault_x");
        assert_eq!(record.content, RecordContent::Plaintext(d.content));
        assert_eq!(record.metadata.user_id, "pinvault_x");
    }
}
