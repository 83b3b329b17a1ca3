// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Namespace-scoped record store with sealed content.
//!
//! Record content is sealed with the namespace's content key before it is
//! written. Reads open it again; a row that fails to open is returned as
//! [`RecordContent::Undecryptable`] with a warning so one bad row never hides
//! the rest of a listing.
//!
//! Deletes are soft: `deleted_at` is set and reads skip the record unless the
//! filter asks for deleted rows.

use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::namespace_db::{NamespaceDb, StoreError, StoreResult};
use super::outbox::{Outbox, OutboxBatch, OutboxStats};
use super::records::{
    DataRecord, ExportOptions, NewRecord, RecordContent, RecordFilter, RecordId, RecordMetadata,
    RecordUpdate, StoredContent, StoredRecord,
};
use crate::capability::Operation;
use crate::crypto::{self, ContentKey, Namespace};

pub struct EncryptedStore {
    db: Arc<NamespaceDb>,
    key: ContentKey,
    namespace: Namespace,
}

impl EncryptedStore {
    pub fn open(path: &Path, namespace: Namespace, key: ContentKey) -> StoreResult<Self> {
        let db = Arc::new(NamespaceDb::open(path)?);
        Ok(Self::new(db, namespace, key))
    }

    pub fn new(db: Arc<NamespaceDb>, namespace: Namespace, key: ContentKey) -> Self {
        Self { db, key, namespace }
    }

    pub fn db(&self) -> &Arc<NamespaceDb> {
        &self.db
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Seal and persist a new record.
    ///
    /// Fails with `DuplicateRecord` if a live record already exists for the
    /// same `(date, category, subcategory)`.
    pub fn save(&self, record: NewRecord) -> StoreResult<DataRecord> {
        self.save_with_id(RecordId::new(), record)
    }

    pub fn save_with_id(&self, id: RecordId, record: NewRecord) -> StoreResult<DataRecord> {
        let now = Utc::now();
        let stored = StoredRecord {
            id,
            date: record.date,
            category: record.category,
            subcategory: record.subcategory,
            content: StoredContent::Sealed(self.seal(&record.content)?),
            tags: record.tags,
            metadata: RecordMetadata::new(self.namespace.as_str(), record.source, now),
        };
        self.db.put_record(&stored)?;
        debug!(record_id = %stored.id, category = %stored.category, "Saved record");

        Ok(DataRecord {
            id: stored.id,
            date: stored.date,
            category: stored.category,
            subcategory: stored.subcategory,
            content: RecordContent::Decrypted(record.content),
            tags: stored.tags,
            metadata: stored.metadata,
        })
    }

    /// Fetch one record, including soft-deleted ones.
    pub fn get(&self, id: &RecordId) -> StoreResult<DataRecord> {
        let stored = self
            .db
            .get_record(id.as_str())?
            .ok_or_else(|| StoreError::NotFound(format!("record {id}")))?;
        Ok(self.decrypt(stored))
    }

    /// Replace content and/or tags of a live record.
    pub fn update(&self, id: &RecordId, update: RecordUpdate) -> StoreResult<DataRecord> {
        let mut stored = self.live(id)?;
        if let Some(content) = &update.content {
            stored.content = StoredContent::Sealed(self.seal(content)?);
        }
        if let Some(tags) = update.tags {
            stored.tags = tags;
        }
        stored.metadata.updated_at = Utc::now();
        stored.metadata.version = stored.metadata.version.saturating_add(1);
        self.db.put_record(&stored)?;
        Ok(self.decrypt(stored))
    }

    /// Mark a live record deleted. The row stays on disk.
    pub fn soft_delete(&self, id: &RecordId) -> StoreResult<DataRecord> {
        let mut stored = self.live(id)?;
        let now = Utc::now();
        stored.metadata.deleted_at = Some(now);
        stored.metadata.updated_at = now;
        self.db.put_record(&stored)?;
        debug!(record_id = %id, "Soft-deleted record");
        Ok(self.decrypt(stored))
    }

    /// Records matching `filter`, ordered by date then creation time.
    pub fn query(&self, filter: &RecordFilter) -> StoreResult<Vec<DataRecord>> {
        let mut matched: Vec<StoredRecord> = self
            .db
            .list_records()?
            .into_iter()
            .filter(|r| {
                filter.matches(r.date, &r.category, &r.subcategory, &r.tags, r.is_deleted())
            })
            .collect();
        matched.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then(a.metadata.created_at.cmp(&b.metadata.created_at))
        });
        Ok(matched.into_iter().map(|r| self.decrypt(r)).collect())
    }

    /// Every record dated within `[from, to]`, for backup or hand-off.
    pub fn export_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        options: &ExportOptions,
    ) -> StoreResult<Vec<DataRecord>> {
        let filter = RecordFilter {
            date_from: Some(from),
            date_to: Some(to),
            include_deleted: options.include_deleted,
            ..RecordFilter::default()
        };
        let records = self.query(&filter)?;
        if options.categories.is_empty() {
            return Ok(records);
        }
        Ok(records
            .into_iter()
            .filter(|r| options.categories.contains(&r.category))
            .collect())
    }

    pub fn count(&self, include_deleted: bool) -> StoreResult<u64> {
        self.db.count_records(include_deleted)
    }

    pub fn check(&self) -> StoreResult<()> {
        self.db.check()
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    pub fn outbox(&self) -> Outbox<'_> {
        Outbox::new(&self.db, &self.key)
    }

    pub fn outbox_push(&self, operation: &Operation) -> StoreResult<Uuid> {
        self.outbox().push(operation, Utc::now())
    }

    pub fn outbox_batch(&self) -> StoreResult<OutboxBatch> {
        self.outbox().batch(Utc::now())
    }

    pub fn outbox_ack(&self, id: &str) -> StoreResult<bool> {
        self.outbox().ack(id)
    }

    pub fn outbox_stats(&self) -> StoreResult<OutboxStats> {
        self.outbox().stats()
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn live(&self, id: &RecordId) -> StoreResult<StoredRecord> {
        self.db
            .get_record(id.as_str())?
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| StoreError::NotFound(format!("record {id}")))
    }

    fn seal(&self, content: &Value) -> StoreResult<String> {
        Ok(crypto::seal(&self.key, &serde_json::to_vec(content)?)?)
    }

    fn decrypt(&self, stored: StoredRecord) -> DataRecord {
        let content = match stored.content {
            StoredContent::Plain(value) => RecordContent::Plaintext(value),
            StoredContent::Sealed(ciphertext) => match crypto::open(&self.key, &ciphertext) {
                Ok(bytes) => RecordContent::Decrypted(
                    serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                        Value::String(String::from_utf8_lossy(&bytes).into_owned())
                    }),
                ),
                Err(e) => {
                    warn!(record_id = %stored.id, error = %e, "Record content failed to decrypt");
                    RecordContent::Undecryptable(ciphertext)
                }
            },
        };

        DataRecord {
            id: stored.id,
            date: stored.date,
            category: stored.category,
            subcategory: stored.subcategory,
            content,
            tags: stored.tags,
            metadata: stored.metadata,
        }
    }
}
