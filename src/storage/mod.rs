// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Local persistence, always available.
//!
//! ## Storage Layout
//!
//! ```text
//! <DATA_DIR>/
//!   device.redb              # device key/value (salts, remember blob)
//!   namespaces/<ns>.redb     # one database per namespace
//!     records                # sealed record content
//!     record_keys            # live (date, category, subcategory) index
//!     outbox                 # pending higher-capability writes
//!     search_tokens          # inverted token index
//!     meta                   # schema version
//! ```
//!
//! Session tokens live in a process-lifetime [`kv::MemoryKeyValueStore`] and
//! never reach disk.

pub mod encrypted_store;
pub mod kv;
pub mod migrations;
pub mod namespace_db;
pub mod outbox;
pub mod paths;
pub mod records;
pub mod search_index;

pub use encrypted_store::EncryptedStore;
pub use kv::{KeyValueStore, MemoryKeyValueStore, RedbKeyValueStore, StorageEvent};
pub use namespace_db::{NamespaceDb, StoreError, StoreResult};
pub use outbox::{OutboxBatch, OutboxEntry, OutboxPolicy, OutboxStats};
pub use paths::StoragePaths;
pub use records::{
    DataRecord, ExportOptions, NewRecord, RecordContent, RecordFilter, RecordId, RecordMetadata,
    RecordSource, RecordUpdate,
};
pub use search_index::{tokenize, SearchIndex, SearchToken};
