// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Versioned schema upgrades for namespace databases.
//!
//! | Version | Change |
//! |---------|--------|
//! | 1 | Records with date/category/subcategory, sealed content and tags |
//! | 2 | `metadata.source` (default `user`) and `metadata.version` (default 1) |
//! | 3 | Uniqueness index keyed by a JSON array instead of `date|category|subcategory` |
//!
//! Upgrades only add fields or rebuild indexes. Rows that fail to parse as
//! JSON are left as-is.

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::namespace_db::{NamespaceDb, StoreResult};

pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Bring `db` up to [`CURRENT_SCHEMA_VERSION`]. Idempotent.
pub fn run(db: &NamespaceDb) -> StoreResult<()> {
    let from = db.schema_version()?;
    if from >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let mut changed = Vec::new();
    if from < 2 {
        changed = backfill_all(db)?;
        db.rewrite_raw_records(&changed, 2)?;
    }
    let keys = db.rebuild_record_keys(CURRENT_SCHEMA_VERSION)?;

    if changed.is_empty() {
        debug!(from, to = CURRENT_SCHEMA_VERSION, keys, "Stamped namespace schema version");
    } else {
        info!(
            from,
            to = CURRENT_SCHEMA_VERSION,
            upgraded = changed.len(),
            keys,
            "Migrated namespace records"
        );
    }
    Ok(())
}

/// Rows that changed under the v1 → v2 backfill.
fn backfill_all(db: &NamespaceDb) -> StoreResult<Vec<(String, Vec<u8>)>> {
    let mut changed = Vec::new();
    for (id, bytes) in db.raw_records()? {
        let mut value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(record_id = %id, error = %e, "Leaving unparseable record during migration");
                continue;
            }
        };
        if backfill_source_and_version(&mut value) {
            changed.push((id, serde_json::to_vec(&value)?));
        }
    }
    Ok(changed)
}

/// v1 → v2. Returns whether the record was modified.
fn backfill_source_and_version(record: &mut Value) -> bool {
    let Some(fields) = record.as_object_mut() else {
        return false;
    };

    let metadata = fields
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    let Some(metadata) = metadata.as_object_mut() else {
        return false;
    };

    let mut modified = false;
    if !metadata.contains_key("source") {
        metadata.insert("source".into(), json!("user"));
        modified = true;
    }
    if !metadata.contains_key("version") {
        metadata.insert("version".into(), json!(1));
        modified = true;
    }
    modified
}
