// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-namespace local database backed by redb (pure Rust, ACID).
//!
//! One file per namespace; nothing in it is shared between users.
//!
//! ## Table Layout
//!
//! - `records`: record id → serialized StoredRecord (content sealed)
//! - `record_keys`: `["date","category","subcategory"]` → id of the live record
//! - `outbox`: entry id → serialized outbox wire entry (payload sealed)
//! - `outbox_dead_letter`: entry id → raw bytes of entries that no longer parse
//! - `search_tokens`: token → serialized SearchToken (multimap)
//! - `meta`: key → u32 (schema version)

use std::path::Path;

use chrono::NaiveDate;
use redb::{
    Database, MultimapTableDefinition, ReadableDatabase, ReadableMultimapTable, ReadableTable,
    TableDefinition,
};
use tracing::warn;

use super::migrations;
use super::records::StoredRecord;
use crate::crypto::CryptoError;

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: record id → StoredRecord (JSON bytes).
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Uniqueness index over live records: JSON `[date, category, subcategory]` → record id.
const RECORD_KEYS: TableDefinition<&str, &str> = TableDefinition::new("record_keys");

/// Pending cross-store operations: entry id → wire JSON bytes.
const OUTBOX: TableDefinition<&str, &[u8]> = TableDefinition::new("outbox");

/// Outbox entries whose envelope could not be parsed, kept verbatim.
const OUTBOX_DEAD_LETTER: TableDefinition<&str, &[u8]> =
    TableDefinition::new("outbox_dead_letter");

/// Inverted index: token → SearchToken (JSON bytes), many per token.
const SEARCH_TOKENS: MultimapTableDefinition<&str, &[u8]> =
    MultimapTableDefinition::new("search_tokens");

/// Store metadata.
const META: TableDefinition<&str, u32> = TableDefinition::new("meta");

const SCHEMA_VERSION_KEY: &str = "schema_version";

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("record already exists for {date}/{category}/{subcategory}")]
    DuplicateRecord {
        date: NaiveDate,
        category: String,
        subcategory: String,
    },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// NamespaceDb
// =============================================================================

pub struct NamespaceDb {
    db: Database,
}

impl NamespaceDb {
    /// Open (or create) the database at `path` and bring it to the current
    /// schema version.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RECORDS)?;
            let _ = write_txn.open_table(RECORD_KEYS)?;
            let _ = write_txn.open_table(OUTBOX)?;
            let _ = write_txn.open_table(OUTBOX_DEAD_LETTER)?;
            let _ = write_txn.open_multimap_table(SEARCH_TOKENS)?;
            let _ = write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        let this = Self { db };
        migrations::run(&this)?;
        Ok(this)
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Insert or replace a record, keeping the uniqueness index in step.
    ///
    /// Fails with `DuplicateRecord` when a different live record already holds
    /// the same `(date, category, subcategory)`.
    pub fn put_record(&self, record: &StoredRecord) -> StoreResult<()> {
        let bytes = serde_json::to_vec(record)?;
        let id = record.id.as_str();

        let write_txn = self.db.begin_write()?;
        {
            let mut records = write_txn.open_table(RECORDS)?;
            let mut keys = write_txn.open_table(RECORD_KEYS)?;

            let previous = match records.get(id)? {
                Some(guard) => serde_json::from_slice::<StoredRecord>(guard.value()).ok(),
                None => None,
            };
            if let Some(previous) = previous.filter(|p| !p.is_deleted()) {
                let old_key = previous.unique_key();
                let holder = keys.get(old_key.as_str())?.map(|g| g.value().to_string());
                if holder.as_deref() == Some(id) {
                    keys.remove(old_key.as_str())?;
                }
            }

            if !record.is_deleted() {
                let key = record.unique_key();
                let holder = keys.get(key.as_str())?.map(|g| g.value().to_string());
                if holder.is_some_and(|holder| holder != id) {
                    return Err(StoreError::DuplicateRecord {
                        date: record.date,
                        category: record.category.clone(),
                        subcategory: record.subcategory.clone(),
                    });
                }
                keys.insert(key.as_str(), id)?;
            }

            records.insert(id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_record(&self, id: &str) -> StoreResult<Option<StoredRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        match table.get(id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// All records, including soft-deleted ones. Rows that no longer parse are
    /// skipped with a warning.
    pub fn list_records(&self) -> StoreResult<Vec<StoredRecord>> {
        let mut out = Vec::new();
        for (id, bytes) in self.raw_records()? {
            match serde_json::from_slice::<StoredRecord>(&bytes) {
                Ok(record) => out.push(record),
                Err(e) => warn!(record_id = %id, error = %e, "Skipping unreadable record row"),
            }
        }
        Ok(out)
    }

    pub fn count_records(&self, include_deleted: bool) -> StoreResult<u64> {
        let records = self.list_records()?;
        Ok(records
            .iter()
            .filter(|r| include_deleted || !r.is_deleted())
            .count() as u64)
    }

    /// Raw record rows, used by schema migrations.
    pub(crate) fn raw_records(&self) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            out.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(out)
    }

    /// Overwrite raw record rows and set the schema version in one transaction.
    pub(crate) fn rewrite_raw_records(
        &self,
        rows: &[(String, Vec<u8>)],
        schema_version: u32,
    ) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut records = write_txn.open_table(RECORDS)?;
            for (id, bytes) in rows {
                records.insert(id.as_str(), bytes.as_slice())?;
            }
            let mut meta = write_txn.open_table(META)?;
            meta.insert(SCHEMA_VERSION_KEY, schema_version)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Rebuild the uniqueness index from live records and set the schema
    /// version in one transaction.
    pub(crate) fn rebuild_record_keys(&self, schema_version: u32) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let rebuilt = {
            let mut live = Vec::new();
            let records = write_txn.open_table(RECORDS)?;
            for entry in records.iter()? {
                let (id, bytes) = entry?;
                match serde_json::from_slice::<StoredRecord>(bytes.value()) {
                    Ok(record) if !record.is_deleted() => {
                        live.push((record.unique_key(), id.value().to_string()))
                    }
                    Ok(_) => {}
                    Err(e) => warn!(record_id = %id.value(), error = %e, "Skipping unreadable record row"),
                }
            }
            drop(records);

            write_txn.delete_table(RECORD_KEYS)?;
            let mut keys = write_txn.open_table(RECORD_KEYS)?;
            for (key, id) in &live {
                keys.insert(key.as_str(), id.as_str())?;
            }
            let mut meta = write_txn.open_table(META)?;
            meta.insert(SCHEMA_VERSION_KEY, schema_version)?;
            live.len()
        };
        write_txn.commit()?;
        Ok(rebuilt)
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    pub fn outbox_put(&self, id: &str, bytes: &[u8]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(OUTBOX)?;
            table.insert(id, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn outbox_get(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTBOX)?;
        Ok(table.get(id)?.map(|g| g.value().to_vec()))
    }

    pub fn outbox_entries(&self) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTBOX)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            out.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(out)
    }

    /// Remove an entry. Returns whether it existed.
    pub fn outbox_remove(&self, id: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(OUTBOX)?;
            let removed = table.remove(id)?;
            removed.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// Move an entry to the dead-letter table as-is. Returns whether it
    /// existed.
    pub fn outbox_bury(&self, id: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(OUTBOX)?;
            let removed = table.remove(id)?.map(|g| g.value().to_vec());
            match removed {
                Some(bytes) => {
                    let mut dead = write_txn.open_table(OUTBOX_DEAD_LETTER)?;
                    dead.insert(id, bytes.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(existed)
    }

    pub fn outbox_buried_count(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTBOX_DEAD_LETTER)?;
        Ok(table.iter()?.count() as u64)
    }

    // =========================================================================
    // Search Tokens
    // =========================================================================

    /// Append postings in a single transaction.
    pub fn insert_tokens(&self, rows: &[(String, Vec<u8>)]) -> StoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_multimap_table(SEARCH_TOKENS)?;
            for (token, posting) in rows {
                table.insert(token.as_str(), posting.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove every posting matching `is_stale`, then append `rows`, in one
    /// transaction. Returns how many postings were removed.
    pub fn replace_tokens<F>(&self, is_stale: F, rows: &[(String, Vec<u8>)]) -> StoreResult<usize>
    where
        F: Fn(&[u8]) -> bool,
    {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_multimap_table(SEARCH_TOKENS)?;
            let mut stale = Vec::new();
            for entry in table.iter()? {
                let (token, postings) = entry?;
                for posting in postings {
                    let posting = posting?;
                    if is_stale(posting.value()) {
                        stale.push((token.value().to_string(), posting.value().to_vec()));
                    }
                }
            }
            for (token, posting) in &stale {
                table.remove(token.as_str(), posting.as_slice())?;
            }
            for (token, posting) in rows {
                table.insert(token.as_str(), posting.as_slice())?;
            }
            stale.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    pub fn tokens_for(&self, token: &str) -> StoreResult<Vec<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_multimap_table(SEARCH_TOKENS)?;
        let mut out = Vec::new();
        for value in table.get(token)? {
            out.push(value?.value().to_vec());
        }
        Ok(out)
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Stored schema version; `0` for a database that has never been stamped.
    pub fn schema_version(&self) -> StoreResult<u32> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META)?;
        Ok(table.get(SCHEMA_VERSION_KEY)?.map(|g| g.value()).unwrap_or(0))
    }

    /// Health probe: a read transaction over every table succeeds.
    pub fn check(&self) -> StoreResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(RECORDS)?;
        let _ = read_txn.open_table(OUTBOX)?;
        let _ = read_txn.open_table(OUTBOX_DEAD_LETTER)?;
        let _ = read_txn.open_multimap_table(SEARCH_TOKENS)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::records::{RecordId, RecordMetadata, StoredContent};
    use chrono::Utc;

    fn record(date: &str, subcategory: &str) -> StoredRecord {
        StoredRecord {
            id: RecordId::new(),
            date: date.parse().unwrap(),
            category: "DEMOGRAPHICS".into(),
            subcategory: subcategory.into(),
            content: StoredContent::Sealed("opaque".into()),
            tags: vec![],
            metadata: RecordMetadata::new("pinvault_test", Default::default(), Utc::now()),
        }
    }

    fn open_db(dir: &tempfile::TempDir) -> NamespaceDb {
        NamespaceDb::open(&dir.path().join("ns.redb")).unwrap()
    }

    #[test]
    fn put_and_get_record() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let rec = record("2025-06-16", "demographics");
        db.put_record(&rec).unwrap();

        let loaded = db.get_record(rec.id.as_str()).unwrap().unwrap();
        assert_eq!(loaded.id, rec.id);
        assert_eq!(db.count_records(false).unwrap(), 1);
    }

    #[test]
    fn duplicate_live_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        db.put_record(&record("2025-06-16", "demographics")).unwrap();
        let err = db.put_record(&record("2025-06-16", "demographics")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRecord { .. }));

        // Different subcategory on the same date is fine
        db.put_record(&record("2025-06-16", "settings")).unwrap();
        assert_eq!(db.count_records(false).unwrap(), 2);
    }

    #[test]
    fn deleting_frees_the_unique_key() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let mut rec = record("2025-06-16", "demographics");
        db.put_record(&rec).unwrap();

        rec.metadata.deleted_at = Some(Utc::now());
        db.put_record(&rec).unwrap();

        db.put_record(&record("2025-06-16", "demographics")).unwrap();
        assert_eq!(db.count_records(false).unwrap(), 1);
        assert_eq!(db.count_records(true).unwrap(), 2);
    }

    #[test]
    fn rewriting_same_record_keeps_its_key() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let mut rec = record("2025-06-16", "demographics");
        db.put_record(&rec).unwrap();
        rec.tags.push("edited".into());
        db.put_record(&rec).unwrap();

        assert_eq!(db.count_records(false).unwrap(), 1);
    }

    #[test]
    fn outbox_rows_roundtrip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        db.outbox_put("a", b"{}").unwrap();
        db.outbox_put("b", b"[]").unwrap();
        assert_eq!(db.outbox_entries().unwrap().len(), 2);
        assert_eq!(db.outbox_get("a").unwrap().as_deref(), Some(&b"{}"[..]));

        assert!(db.outbox_remove("a").unwrap());
        assert!(!db.outbox_remove("a").unwrap());
        assert_eq!(db.outbox_entries().unwrap().len(), 1);
    }

    #[test]
    fn token_postings_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        db.insert_tokens(&[
            ("aspirin".into(), b"one".to_vec()),
            ("aspirin".into(), b"two".to_vec()),
            ("ibuprofen".into(), b"three".to_vec()),
        ])
        .unwrap();

        assert_eq!(db.tokens_for("aspirin").unwrap().len(), 2);
        assert_eq!(db.tokens_for("ibuprofen").unwrap().len(), 1);
        assert!(db.tokens_for("missing").unwrap().is_empty());
    }

    #[test]
    fn fresh_database_is_stamped_with_current_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        assert_eq!(db.schema_version().unwrap(), migrations::CURRENT_SCHEMA_VERSION);
        db.check().unwrap();
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record("2025-06-16", "demographics");
        {
            let db = open_db(&dir);
            db.put_record(&rec).unwrap();
        }
        let db = open_db(&dir);
        assert!(db.get_record(rec.id.as_str()).unwrap().is_some());
    }

    #[test]
    fn separator_in_fields_does_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let mut first = record("2025-06-16", "c");
        first.category = "A|B".into();
        let mut second = record("2025-06-16", "B|c");
        second.category = "A".into();

        db.put_record(&first).unwrap();
        db.put_record(&second).unwrap();
        assert_eq!(db.count_records(false).unwrap(), 2);
    }

    #[test]
    fn rebuilt_keys_cover_live_records_only() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let live = record("2025-06-16", "demographics");
        let mut gone = record("2025-06-17", "demographics");
        db.put_record(&live).unwrap();
        db.put_record(&gone).unwrap();
        gone.metadata.deleted_at = Some(Utc::now());
        db.put_record(&gone).unwrap();

        assert_eq!(db.rebuild_record_keys(migrations::CURRENT_SCHEMA_VERSION).unwrap(), 1);
        let err = db.put_record(&record("2025-06-16", "demographics")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRecord { .. }));
        db.put_record(&record("2025-06-17", "demographics")).unwrap();
    }

    #[test]
    fn buried_outbox_entries_leave_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        db.outbox_put("a", b"not json").unwrap();
        assert!(db.outbox_bury("a").unwrap());
        assert!(!db.outbox_bury("a").unwrap());

        assert!(db.outbox_entries().unwrap().is_empty());
        assert_eq!(db.outbox_buried_count().unwrap(), 1);
    }

    #[test]
    fn replacing_tokens_drops_stale_postings() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        db.insert_tokens(&[
            ("aspirin".into(), b"old".to_vec()),
            ("aspirin".into(), b"other".to_vec()),
            ("daily".into(), b"old".to_vec()),
        ])
        .unwrap();

        let removed = db
            .replace_tokens(|p| p == b"old", &[("ibuprofen".into(), b"new".to_vec())])
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(db.tokens_for("aspirin").unwrap(), vec![b"other".to_vec()]);
        assert!(db.tokens_for("daily").unwrap().is_empty());
        assert_eq!(db.tokens_for("ibuprofen").unwrap().len(), 1);
    }
}
