// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable outbox of pending higher-capability writes.
//!
//! Entries live in the namespace database next to the records they describe.
//! The payload is sealed with the content key; the envelope stays readable so
//! retries can be tracked without the key.
//!
//! ## Wire Form
//!
//! ```json
//! {
//!   "id": "uuid",
//!   "op": "save" | "update" | "delete",
//!   "entity": "MedicalEvent" | "Provider" | "Appointment" | "GenericRecord",
//!   "payload": "<sealed JSON>",
//!   "createdAt": "2025-06-16T10:00:00Z",
//!   "retryCount": 0,
//!   "lastError": "optional",
//!   "nextAttemptAt": "optional",
//!   "deadLettered": false
//! }
//! ```
//!
//! ## Retry Policy
//!
//! Each failure increments `retryCount` and schedules the next attempt with
//! exponential backoff. After `max_attempts` failures the entry is
//! dead-lettered: kept on disk, reported by health, never replayed. An
//! envelope that no longer parses is moved to the dead-letter table on its
//! first failure.
//!
//! ## Ordering
//!
//! Entries for the same record replay in creation order. An entry waiting out
//! its backoff holds back every later entry for that record.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::namespace_db::{NamespaceDb, StoreError, StoreResult};
use super::records::RecordId;
use crate::capability::{Entity, EntityKind, Operation, RecordDraft};
use crate::crypto::{self, ContentKey};

// =============================================================================
// Policy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxPolicy {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Failures before an entry is dead-lettered; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for OutboxPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(15 * 60),
            max_attempts: Some(25),
        }
    }
}

impl OutboxPolicy {
    /// Retry on every drain with no dead-lettering.
    pub fn immediate() -> Self {
        Self {
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            max_attempts: None,
        }
    }

    /// Delay before the next attempt after `retry_count` failures.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(20);
        self.base_backoff
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_backoff)
    }
}

// =============================================================================
// Entries
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireOp {
    Save,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutboxWire {
    id: Uuid,
    op: WireOp,
    entity: EntityKind,
    payload: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    dead_lettered: bool,
}

impl OutboxWire {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.dead_lettered && self.next_attempt_at.is_none_or(|at| at <= now)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DeletePayload {
    id: RecordId,
}

/// A decoded outbox entry ready for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub operation: Operation,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// An entry whose payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableEntry {
    pub id: String,
    pub error: String,
}

/// Due entries in creation order, plus the ones that failed to decode.
#[derive(Debug, Default)]
pub struct OutboxBatch {
    pub ready: Vec<OutboxEntry>,
    pub unreadable: Vec<UnreadableEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub pending: u64,
    pub dead_lettered: u64,
}

/// Result of recording a failed replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub retry_count: u32,
    pub dead_lettered: bool,
}

// =============================================================================
// Repository
// =============================================================================

pub struct Outbox<'a> {
    db: &'a NamespaceDb,
    key: &'a ContentKey,
}

impl<'a> Outbox<'a> {
    pub fn new(db: &'a NamespaceDb, key: &'a ContentKey) -> Self {
        Self { db, key }
    }

    /// Append an operation. Entries are never coalesced.
    pub fn push(&self, operation: &Operation, now: DateTime<Utc>) -> StoreResult<Uuid> {
        let (op, payload) = match operation {
            Operation::Save(entity) => (WireOp::Save, serde_json::to_vec(entity.draft())?),
            Operation::Update(entity) => (WireOp::Update, serde_json::to_vec(entity.draft())?),
            Operation::Delete { id, .. } => (WireOp::Delete, serde_json::to_vec(&json!({ "id": id }))?),
        };

        let wire = OutboxWire {
            id: Uuid::new_v4(),
            op,
            entity: operation.entity_kind(),
            payload: crypto::seal(self.key, &payload)?,
            created_at: now,
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
            dead_lettered: false,
        };
        self.db
            .outbox_put(&wire.id.to_string(), &serde_json::to_vec(&wire)?)?;
        Ok(wire.id)
    }

    /// Entries due at `now`, oldest first.
    ///
    /// An entry is left out while an older entry for the same record is
    /// still waiting.
    pub fn batch(&self, now: DateTime<Utc>) -> StoreResult<OutboxBatch> {
        let mut batch = OutboxBatch::default();
        let mut held = HashSet::new();

        for wire in self.live_wires(&mut batch.unreadable)? {
            let due = wire.is_due(now);
            let operation = match self.decode(&wire) {
                Ok(operation) => operation,
                Err(e) => {
                    if due {
                        batch.unreadable.push(UnreadableEntry {
                            id: wire.id.to_string(),
                            error: e.to_string(),
                        });
                    }
                    continue;
                }
            };

            let record_id = operation.record_id().clone();
            if !due || held.contains(&record_id) {
                held.insert(record_id);
                continue;
            }
            batch.ready.push(OutboxEntry {
                id: wire.id,
                operation,
                created_at: wire.created_at,
                retry_count: wire.retry_count,
                last_error: wire.last_error,
            });
        }
        Ok(batch)
    }

    /// Whether a replayable entry for `record_id` is queued.
    pub fn has_pending_for(&self, record_id: &RecordId) -> StoreResult<bool> {
        let mut unreadable = Vec::new();
        for wire in self.live_wires(&mut unreadable)? {
            if let Ok(operation) = self.decode(&wire) {
                if operation.record_id() == record_id {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Parsed entries that are not dead-lettered, oldest first. Envelopes that
    /// do not parse are reported in `unreadable`.
    fn live_wires(&self, unreadable: &mut Vec<UnreadableEntry>) -> StoreResult<Vec<OutboxWire>> {
        let mut wires = Vec::new();
        for (id, bytes) in self.db.outbox_entries()? {
            match serde_json::from_slice::<OutboxWire>(&bytes) {
                Ok(wire) if !wire.dead_lettered => wires.push(wire),
                Ok(_) => {}
                Err(e) => unreadable.push(UnreadableEntry {
                    id,
                    error: e.to_string(),
                }),
            }
        }
        wires.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(wires)
    }

    /// Remove a replayed entry. Returns whether it was still present.
    pub fn ack(&self, id: &str) -> StoreResult<bool> {
        self.db.outbox_remove(id)
    }

    /// Count the failure against the entry and schedule its next attempt.
    pub fn record_failure(
        &self,
        id: &str,
        error: &str,
        policy: &OutboxPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<FailureOutcome> {
        let bytes = self
            .db
            .outbox_get(id)?
            .ok_or_else(|| StoreError::NotFound(format!("outbox entry {id}")))?;
        let mut wire: OutboxWire = match serde_json::from_slice(&bytes) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(entry_id = id, error, parse_error = %e, "Unparseable outbox entry dead-lettered");
                self.db.outbox_bury(id)?;
                return Ok(FailureOutcome {
                    retry_count: 1,
                    dead_lettered: true,
                });
            }
        };

        wire.retry_count = wire.retry_count.saturating_add(1);
        wire.last_error = Some(error.to_string());
        let delay = TimeDelta::from_std(policy.backoff(wire.retry_count)).unwrap_or(TimeDelta::MAX);
        wire.next_attempt_at = Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
        if policy.max_attempts.is_some_and(|max| wire.retry_count >= max) {
            wire.dead_lettered = true;
            warn!(
                entry_id = %wire.id,
                retry_count = wire.retry_count,
                error,
                "Outbox entry dead-lettered"
            );
        }

        self.db.outbox_put(id, &serde_json::to_vec(&wire)?)?;
        Ok(FailureOutcome {
            retry_count: wire.retry_count,
            dead_lettered: wire.dead_lettered,
        })
    }

    pub fn stats(&self) -> StoreResult<OutboxStats> {
        let mut stats = OutboxStats {
            pending: 0,
            dead_lettered: self.db.outbox_buried_count()?,
        };
        for (_, bytes) in self.db.outbox_entries()? {
            match serde_json::from_slice::<OutboxWire>(&bytes) {
                Ok(wire) if wire.dead_lettered => stats.dead_lettered += 1,
                _ => stats.pending += 1,
            }
        }
        Ok(stats)
    }

    fn decode(&self, wire: &OutboxWire) -> StoreResult<Operation> {
        let payload = crypto::open(self.key, &wire.payload)?;
        Ok(match wire.op {
            WireOp::Save => {
                let draft: RecordDraft = serde_json::from_slice(&payload)?;
                Operation::Save(Entity::new(wire.entity, draft))
            }
            WireOp::Update => {
                let draft: RecordDraft = serde_json::from_slice(&payload)?;
                Operation::Update(Entity::new(wire.entity, draft))
            }
            WireOp::Delete => {
                let DeletePayload { id } = serde_json::from_slice(&payload)?;
                Operation::Delete {
                    kind: wire.entity,
                    id,
                }
            }
        })
    }
}
