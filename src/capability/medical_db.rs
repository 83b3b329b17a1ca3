// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! redb-backed higher-capability store.
//!
//! One database per namespace with a table per entity kind. Content is held
//! in plaintext and searched natively by substring match.
//!
//! ## Table Layout
//!
//! - `medical_events`, `providers`, `appointments`, `generic_records`:
//!   record id → serialized RecordDraft

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, warn};

use super::{
    CapabilityConnector, CapabilityError, CapabilityStore, EntityKind, NativeHit, RecordDraft,
};
use crate::crypto::Namespace;
use crate::storage::namespace_db::StoreError;
use crate::storage::paths::StoragePaths;
use crate::storage::records::{RecordFilter, RecordId};

// =============================================================================
// Table Definitions
// =============================================================================

const MEDICAL_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("medical_events");
const PROVIDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("providers");
const APPOINTMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("appointments");
const GENERIC_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("generic_records");

const ALL_KINDS: [EntityKind; 4] = [
    EntityKind::MedicalEvent,
    EntityKind::Provider,
    EntityKind::Appointment,
    EntityKind::GenericRecord,
];

fn table_for(kind: EntityKind) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match kind {
        EntityKind::MedicalEvent => MEDICAL_EVENTS,
        EntityKind::Provider => PROVIDERS,
        EntityKind::Appointment => APPOINTMENTS,
        EntityKind::GenericRecord => GENERIC_RECORDS,
    }
}

// =============================================================================
// MedicalDatabase
// =============================================================================

pub struct MedicalDatabase {
    db: Database,
}

impl MedicalDatabase {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            for kind in ALL_KINDS {
                let _ = write_txn.open_table(table_for(kind))?;
            }
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    fn put(&self, kind: EntityKind, draft: &RecordDraft) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(draft)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table_for(kind))?;
            table.insert(draft.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        debug!(record_id = %draft.id, kind = ?kind, "Stored entity");
        Ok(())
    }

    fn remove(&self, kind: EntityKind, id: &RecordId) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table_for(kind))?;
            table.remove(id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn all(&self) -> Result<Vec<RecordDraft>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let mut out = Vec::new();
        for kind in ALL_KINDS {
            let table = read_txn.open_table(table_for(kind))?;
            for entry in table.iter()? {
                let (id, bytes) = entry?;
                match serde_json::from_slice::<RecordDraft>(bytes.value()) {
                    Ok(draft) => out.push(draft),
                    Err(e) => warn!(record_id = id.value(), error = %e, "Skipping unreadable entity"),
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl CapabilityStore for MedicalDatabase {
    async fn ping(&self) -> Result<(), CapabilityError> {
        let read_txn = self.db.begin_read().map_err(StoreError::from)?;
        let _ = read_txn
            .open_table(MEDICAL_EVENTS)
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn save_medical_event(&self, draft: &RecordDraft) -> Result<(), CapabilityError> {
        Ok(self.put(EntityKind::MedicalEvent, draft)?)
    }

    async fn save_provider(&self, draft: &RecordDraft) -> Result<(), CapabilityError> {
        Ok(self.put(EntityKind::Provider, draft)?)
    }

    async fn save_appointment(&self, draft: &RecordDraft) -> Result<(), CapabilityError> {
        Ok(self.put(EntityKind::Appointment, draft)?)
    }

    async fn save_generic(&self, draft: &RecordDraft) -> Result<(), CapabilityError> {
        Ok(self.put(EntityKind::GenericRecord, draft)?)
    }

    async fn delete_entity(&self, kind: EntityKind, id: &RecordId) -> Result<(), CapabilityError> {
        Ok(self.remove(kind, id)?)
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<RecordDraft>, CapabilityError> {
        let mut matched: Vec<RecordDraft> = self
            .all()?
            .into_iter()
            .filter(|d| filter.matches(d.date, &d.category, &d.subcategory, &d.tags, false))
            .collect();
        matched.sort_by(|a, b| a.date.cmp(&b.date).then(a.created_at.cmp(&b.created_at)));
        Ok(matched)
    }

    async fn search(&self, query: &str) -> Result<Option<Vec<NativeHit>>, CapabilityError> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let mut hits = Vec::new();
        for draft in self.all()? {
            let text = match &draft.content {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let lowered = text.to_lowercase();
            if terms.iter().any(|t| lowered.contains(t.as_str())) {
                hits.push(NativeHit {
                    record_id: draft.id,
                    record_type: draft.category,
                    text: lowered,
                });
            }
        }
        Ok(Some(hits))
    }

    async fn count(&self) -> Result<u64, CapabilityError> {
        let read_txn = self.db.begin_read().map_err(StoreError::from)?;
        let mut total = 0;
        for kind in ALL_KINDS {
            let table = read_txn
                .open_table(table_for(kind))
                .map_err(StoreError::from)?;
            total += table.len().map_err(StoreError::from)?;
        }
        Ok(total)
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens `capability/<ns>.redb`, sharing the handle while it is alive.
pub struct MedicalDatabaseConnector {
    paths: StoragePaths,
    open: Mutex<HashMap<Namespace, Weak<MedicalDatabase>>>,
}

impl MedicalDatabaseConnector {
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            open: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, namespace: &Namespace) -> PathBuf {
        self.paths.capability_db(namespace)
    }
}

#[async_trait]
impl CapabilityConnector for MedicalDatabaseConnector {
    async fn connect(
        &self,
        namespace: &Namespace,
    ) -> Result<Arc<dyn CapabilityStore>, CapabilityError> {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = open.get(namespace).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let db = Arc::new(
            MedicalDatabase::open(&self.path_for(namespace))
                .map_err(|e| CapabilityError::Unavailable(e.to_string()))?,
        );
        open.insert(namespace.clone(), Arc::downgrade(&db));
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::records::NewRecord;
    use chrono::Utc;
    use serde_json::json;

    fn draft(date: &str, category: &str, subcategory: &str, content: serde_json::Value) -> RecordDraft {
        RecordDraft::from_new(
            RecordId::new(),
            NewRecord::new(date.parse().unwrap(), category, subcategory, content),
            Utc::now(),
        )
    }

    fn namespace() -> Namespace {
        Namespace::parse("pinvault_0123456789abcdef01234567").unwrap()
    }

    #[tokio::test]
    async fn saves_are_partitioned_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let db = MedicalDatabase::open(&dir.path().join("cap.redb")).unwrap();
        db.ping().await.unwrap();

        let event = draft("2025-06-16", "MEDICAL_TIMELINE", "medical-events", json!("Flu shot"));
        let provider = draft("2025-06-16", "MEDICAL_PROVIDERS", "providers", json!("Dr Who"));
        db.save_medical_event(&event).await.unwrap();
        db.save_provider(&provider).await.unwrap();
        assert_eq!(db.count().await.unwrap(), 2);

        let events = db
            .query(&RecordFilter::category("MEDICAL_TIMELINE"))
            .await
            .unwrap();
        assert_eq!(events, vec![event.clone()]);

        // Deleting under the wrong kind leaves the entity in place
        db.delete_entity(EntityKind::Provider, &event.id).await.unwrap();
        assert_eq!(db.count().await.unwrap(), 2);
        db.delete_entity(EntityKind::MedicalEvent, &event.id).await.unwrap();
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn native_search_matches_substrings() {
        let dir = tempfile::tempdir().unwrap();
        let db = MedicalDatabase::open(&dir.path().join("cap.redb")).unwrap();
        db.save_medical_event(&draft(
            "2025-06-16",
            "MEDICAL_TIMELINE",
            "medical-events",
            json!({ "title": "Knee surgery follow-up" }),
        ))
        .await
        .unwrap();

        let hits = db.search("SURGERY").await.unwrap().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_type, "MEDICAL_TIMELINE");
        assert!(db.search("dentist").await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn connector_reuses_live_handles() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MedicalDatabaseConnector::new(StoragePaths::new(dir.path()));

        let first = connector.connect(&namespace()).await.unwrap();
        let second = connector.connect(&namespace()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        drop(first);
        drop(second);
        // The file is closed once every handle is gone, so it can be reopened
        connector.connect(&namespace()).await.unwrap();
    }
}
