// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Hybrid Router
//!
//! Routes each namespace's reads and writes between the local encrypted
//! store and the optional higher-capability store.
//!
//! ## Write Path
//!
//! 1. The routing table picks a target from `(category, subcategory)`.
//! 2. Local writes go straight to the [`EncryptedStore`].
//! 3. Higher-capability writes are applied directly when the store is
//!    available; otherwise, or when the write fails, the operation is queued
//!    in the outbox and the save still succeeds (write-behind). A write for a
//!    record that already has queued entries is queued behind them.
//! 4. Content is tokenized into the search index either way. Deletes drop
//!    the record's postings.
//!
//! ## Outbox Drain
//!
//! [`HybridRouter::drain_outbox`] replays due entries in creation order. When
//! an entry fails, later entries for the same record wait for the next drain.
//! It is single-flight: a drain requested while another is running returns
//! immediately with `skipped = true`.

pub mod registry;
pub mod routing;
pub mod scheduler;
pub mod search;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::capability::{
    self, CapabilityConnector, CapabilityProbe, CapabilityStore, Entity, Operation, RecordDraft,
};
use crate::crypto::Namespace;
use crate::error::VaultError;
use crate::storage::{
    DataRecord, EncryptedStore, NewRecord, OutboxPolicy, RecordFilter, RecordId, RecordUpdate,
    SearchIndex,
};

pub use registry::RouterRegistry;
pub use routing::{categories, entity_kind, subcategories, RoutingTable, StoreTarget};
pub use scheduler::{DrainScheduler, Visibility};
pub use search::{HitSource, SearchHit, SearchOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SaveOutcome {
    #[schema(value_type = String)]
    pub record_id: RecordId,
    pub target: StoreTarget,
    /// Parked in the outbox for a later drain.
    pub queued: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct DrainReport {
    pub processed: usize,
    pub failed: usize,
    /// Another drain was already running.
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct HealthReport {
    pub local: bool,
    pub capability: bool,
    pub local_records: u64,
    pub capability_records: u64,
    pub outbox_pending: u64,
    pub outbox_dead_lettered: u64,
}

pub struct HybridRouter {
    namespace: Namespace,
    local: EncryptedStore,
    index: SearchIndex,
    probe: CapabilityProbe,
    routing: RoutingTable,
    policy: OutboxPolicy,
    drain_lock: Mutex<()>,
    /// Serializes direct higher-capability writes.
    write_lock: Mutex<()>,
}

impl HybridRouter {
    pub fn new(
        local: EncryptedStore,
        connector: Arc<dyn CapabilityConnector>,
        routing: RoutingTable,
        policy: OutboxPolicy,
    ) -> Self {
        let namespace = local.namespace().clone();
        Self {
            index: SearchIndex::new(local.db().clone()),
            probe: CapabilityProbe::new(connector, namespace.clone()),
            namespace,
            local,
            routing,
            policy,
            drain_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn local(&self) -> &EncryptedStore {
        &self.local
    }

    pub async fn capability_available(&self) -> bool {
        self.probe.is_available().await
    }

    /// Drop the memoized probe result so the next operation probes again.
    pub async fn reprobe_capability(&self) {
        self.probe.reset().await;
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn save(&self, record: NewRecord) -> Result<SaveOutcome, VaultError> {
        let target = self.routing.target(&record.category, Some(&record.subcategory));
        let record_type = record.category.clone();
        let content = record.content.clone();

        let (record_id, queued) = match target {
            StoreTarget::Local => (self.local.save(record)?.id, false),
            StoreTarget::Capability => {
                let kind = entity_kind(&record.category, &record.subcategory);
                let draft = RecordDraft::from_new(RecordId::new(), record, Utc::now());
                let id = draft.id.clone();
                let queued = self
                    .write_through(Operation::Save(Entity::new(kind, draft)))
                    .await?;
                (id, queued)
            }
        };

        self.index_content(&record_id, &record_type, &content);
        Ok(SaveOutcome {
            record_id,
            target,
            queued,
        })
    }

    /// Replace a record's content and tags.
    pub async fn update(&self, id: &RecordId, record: NewRecord) -> Result<SaveOutcome, VaultError> {
        let target = self.routing.target(&record.category, Some(&record.subcategory));
        let record_type = record.category.clone();
        let content = record.content.clone();

        let queued = match target {
            StoreTarget::Local => {
                self.local.update(
                    id,
                    RecordUpdate {
                        content: Some(record.content),
                        tags: Some(record.tags),
                    },
                )?;
                false
            }
            StoreTarget::Capability => {
                let kind = entity_kind(&record.category, &record.subcategory);
                let draft = RecordDraft::from_new(id.clone(), record, Utc::now());
                self.write_through(Operation::Update(Entity::new(kind, draft)))
                    .await?
            }
        };

        self.index_content(id, &record_type, &content);
        Ok(SaveOutcome {
            record_id: id.clone(),
            target,
            queued,
        })
    }

    /// Soft-delete locally, or delete the entity from the higher-capability
    /// store (queued when it is unavailable).
    pub async fn delete(
        &self,
        id: &RecordId,
        category: &str,
        subcategory: &str,
    ) -> Result<SaveOutcome, VaultError> {
        let target = self.routing.target(category, Some(subcategory));
        let queued = match target {
            StoreTarget::Local => {
                self.local.soft_delete(id)?;
                false
            }
            StoreTarget::Capability => {
                let kind = entity_kind(category, subcategory);
                self.write_through(Operation::Delete {
                    kind,
                    id: id.clone(),
                })
                .await?
            }
        };

        if let Err(e) = self.index.remove_record(id) {
            warn!(record_id = %id, error = %e, "Failed to drop search postings");
        }
        Ok(SaveOutcome {
            record_id: id.clone(),
            target,
            queued,
        })
    }

    /// Apply directly when possible, otherwise queue. Returns whether queued.
    async fn write_through(&self, operation: Operation) -> Result<bool, VaultError> {
        let _order = self.write_lock.lock().await;

        if self.local.outbox().has_pending_for(operation.record_id())? {
            debug!(
                namespace = %self.namespace,
                record_id = %operation.record_id(),
                op = operation.name(),
                "Record has queued writes, queueing behind them"
            );
            self.enqueue(&operation)?;
            return Ok(true);
        }

        match self.capability().await {
            Ok(store) => match capability::apply(store.as_ref(), &operation).await {
                Ok(()) => Ok(false),
                Err(e) => {
                    warn!(
                        namespace = %self.namespace,
                        op = operation.name(),
                        error = %e,
                        "Higher-capability write failed, queueing in outbox"
                    );
                    self.enqueue(&operation)?;
                    Ok(true)
                }
            },
            Err(_) => {
                self.enqueue(&operation)?;
                Ok(true)
            }
        }
    }

    fn enqueue(&self, operation: &Operation) -> Result<(), VaultError> {
        let entry_id = self.local.outbox_push(operation)?;
        debug!(
            namespace = %self.namespace,
            entry_id = %entry_id,
            op = operation.name(),
            entity = ?operation.entity_kind(),
            "Queued operation"
        );
        Ok(())
    }

    fn index_content(&self, record_id: &RecordId, record_type: &str, content: &Value) {
        if let Err(e) = self.index.index_record(record_id, record_type, content) {
            warn!(record_id = %record_id, error = %e, "Failed to index record content");
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Query the single store that owns `filter.category`. Without a category
    /// the local store is used. An unavailable higher-capability store yields
    /// no records.
    pub async fn query(&self, filter: &RecordFilter) -> Result<Vec<DataRecord>, VaultError> {
        let target = match &filter.category {
            Some(category) => self.routing.target(category, filter.subcategory.as_deref()),
            None => StoreTarget::Local,
        };

        match target {
            StoreTarget::Local => Ok(self.local.query(filter)?),
            StoreTarget::Capability => {
                let Ok(store) = self.capability().await else {
                    debug!(namespace = %self.namespace, "Higher-capability store unavailable for query");
                    return Ok(Vec::new());
                };
                let drafts = store
                    .query(filter)
                    .await
                    .map_err(|e| VaultError::CapabilityUnavailable(e.to_string()))?;
                Ok(drafts
                    .into_iter()
                    .map(|d| d.into_record(self.namespace.as_str()))
                    .collect())
            }
        }
    }

    /// Search the token index and, when available, the higher-capability
    /// store's native search.
    pub async fn universal_search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, VaultError> {
        let terms = search::query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for term in &terms {
            for posting in self.index.search(term)? {
                candidates.push(search::Candidate {
                    record_id: posting.record_id,
                    record_type: posting.record_type,
                    text: None,
                    source: HitSource::Index,
                });
            }
        }

        if let Some(store) = self.probe.handle().await {
            match store.search(query).await {
                Ok(Some(hits)) => candidates.extend(hits.into_iter().map(|h| search::Candidate {
                    record_id: h.record_id,
                    record_type: h.record_type,
                    text: Some(h.text),
                    source: HitSource::Native,
                })),
                Ok(None) => {}
                Err(e) => warn!(namespace = %self.namespace, error = %e, "Native search failed"),
            }
        }

        Ok(search::rank(candidates, &terms, options))
    }

    // =========================================================================
    // Typed Helpers
    // =========================================================================

    pub async fn save_medical_event(
        &self,
        date: NaiveDate,
        content: Value,
    ) -> Result<SaveOutcome, VaultError> {
        self.save(NewRecord::new(
            date,
            categories::MEDICAL_TIMELINE,
            subcategories::MEDICAL_EVENTS,
            content,
        ))
        .await
    }

    pub async fn save_provider(&self, content: Value) -> Result<SaveOutcome, VaultError> {
        self.save(NewRecord::new(
            Utc::now().date_naive(),
            categories::MEDICAL_PROVIDERS,
            subcategories::PROVIDERS,
            content,
        ))
        .await
    }

    pub async fn save_appointment(
        &self,
        date: NaiveDate,
        content: Value,
    ) -> Result<SaveOutcome, VaultError> {
        self.save(NewRecord::new(
            date,
            categories::MEDICAL_APPOINTMENTS,
            subcategories::APPOINTMENTS,
            content,
        ))
        .await
    }

    pub async fn medical_events(
        &self,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<DataRecord>, VaultError> {
        let mut filter = RecordFilter::category(categories::MEDICAL_TIMELINE)
            .with_subcategory(subcategories::MEDICAL_EVENTS);
        if let Some((from, to)) = range {
            filter = filter.between(from, to);
        }
        self.query(&filter).await
    }

    pub async fn providers(&self) -> Result<Vec<DataRecord>, VaultError> {
        self.query(
            &RecordFilter::category(categories::MEDICAL_PROVIDERS)
                .with_subcategory(subcategories::PROVIDERS),
        )
        .await
    }

    pub async fn appointments(
        &self,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<DataRecord>, VaultError> {
        let mut filter = RecordFilter::category(categories::MEDICAL_APPOINTMENTS)
            .with_subcategory(subcategories::APPOINTMENTS);
        if let Some((from, to)) = range {
            filter = filter.between(from, to);
        }
        self.query(&filter).await
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    /// Replay due outbox entries against the higher-capability store.
    ///
    /// Each entry is acknowledged on success; failures are counted, retried
    /// later, and never stop the rest of the batch.
    pub async fn drain_outbox(&self) -> Result<DrainReport, VaultError> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!(namespace = %self.namespace, "Outbox drain already running");
            return Ok(DrainReport {
                skipped: true,
                ..DrainReport::default()
            });
        };

        let Some(store) = self.probe.handle().await else {
            return Ok(DrainReport::default());
        };

        let outbox = self.local.outbox();
        let batch = outbox.batch(Utc::now())?;
        let mut report = DrainReport::default();

        for entry in batch.unreadable {
            report.failed += 1;
            warn!(
                namespace = %self.namespace,
                entry_id = %entry.id,
                error = %entry.error,
                "Outbox entry could not be decoded"
            );
            if let Err(e) = outbox.record_failure(&entry.id, &entry.error, &self.policy, Utc::now())
            {
                warn!(entry_id = %entry.id, error = %e, "Failed to record outbox failure");
            }
        }

        let mut stalled = HashSet::new();
        for entry in batch.ready {
            if stalled.contains(entry.operation.record_id()) {
                continue;
            }
            let entry_id = entry.id.to_string();
            match capability::apply(store.as_ref(), &entry.operation).await {
                Ok(()) => {
                    outbox.ack(&entry_id)?;
                    report.processed += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    stalled.insert(entry.operation.record_id().clone());
                    let failure = VaultError::OutboxReplayFailed {
                        id: entry_id.clone(),
                        reason: e.to_string(),
                    };
                    warn!(
                        namespace = %self.namespace,
                        op = entry.operation.name(),
                        retry_count = entry.retry_count + 1,
                        error = %failure,
                        "Outbox replay failed"
                    );
                    if let Err(e) =
                        outbox.record_failure(&entry_id, &e.to_string(), &self.policy, Utc::now())
                    {
                        warn!(entry_id = %entry_id, error = %e, "Failed to record outbox failure");
                    }
                }
            }
        }

        if report.processed > 0 || report.failed > 0 {
            info!(
                namespace = %self.namespace,
                processed = report.processed,
                failed = report.failed,
                "Outbox drained"
            );
        }
        Ok(report)
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Store liveness, record counts and outbox backlog. Never fails.
    pub async fn health_check(&self) -> HealthReport {
        let local = self.local.check().is_ok();
        let local_records = self.local.count(false).unwrap_or(0);
        let stats = self.local.outbox_stats().unwrap_or_default();

        let (capability, capability_records) = match self.probe.handle().await {
            Some(store) => match store.count().await {
                Ok(count) => (true, count),
                Err(e) => {
                    warn!(namespace = %self.namespace, error = %e, "Higher-capability count failed");
                    (false, 0)
                }
            },
            None => (false, 0),
        };

        HealthReport {
            local,
            capability,
            local_records,
            capability_records,
            outbox_pending: stats.pending,
            outbox_dead_lettered: stats.dead_lettered,
        }
    }

    async fn capability(&self) -> Result<Arc<dyn CapabilityStore>, VaultError> {
        self.probe
            .handle()
            .await
            .ok_or_else(|| VaultError::CapabilityUnavailable(self.namespace.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::EntityKind;
    use crate::crypto::ContentKey;
    use crate::testing::{MemoryCapabilityStore, MemoryConnector};
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryCapabilityStore>,
        router: HybridRouter,
    }

    fn fixture(store: Arc<MemoryCapabilityStore>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let namespace = Namespace::parse("pinvault_0123456789abcdef01234567").unwrap();
        let local = EncryptedStore::open(
            &dir.path().join("ns.redb"),
            namespace,
            ContentKey::from_bytes([5u8; 32]),
        )
        .unwrap();
        let router = HybridRouter::new(
            local,
            MemoryConnector::new(store.clone()),
            RoutingTable::default(),
            OutboxPolicy::immediate(),
        );
        Fixture {
            _dir: dir,
            store,
            router,
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn local_categories_stay_local() {
        let fx = fixture(MemoryCapabilityStore::available());
        let outcome = fx
            .router
            .save(NewRecord::new(
                date("2025-06-16"),
                "DEMOGRAPHICS",
                "demographics",
                json!({ "name": "Ada" }),
            ))
            .await
            .unwrap();

        assert_eq!(outcome.target, StoreTarget::Local);
        assert!(!outcome.queued);
        assert!(fx.store.drafts().is_empty());
        assert_eq!(fx.router.local().count(false).unwrap(), 1);
    }

    #[tokio::test]
    async fn medical_events_go_to_capability_store() {
        let fx = fixture(MemoryCapabilityStore::available());
        let outcome = fx
            .router
            .save_medical_event(date("2025-06-16"), json!({ "title": "Flu shot" }))
            .await
            .unwrap();

        assert_eq!(outcome.target, StoreTarget::Capability);
        assert!(!outcome.queued);
        assert_eq!(fx.store.kinds_of(&outcome.record_id), vec![EntityKind::MedicalEvent]);
        assert_eq!(fx.router.local().count(false).unwrap(), 0);

        let events = fx.router.medical_events(None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, outcome.record_id);
    }

    #[tokio::test]
    async fn unavailable_store_queues_write_behind() {
        let fx = fixture(MemoryCapabilityStore::unavailable());
        let outcome = fx
            .router
            .save_provider(json!({ "name": "Dr Smith" }))
            .await
            .unwrap();

        assert!(outcome.queued);
        let batch = fx.router.local().outbox_batch().unwrap();
        assert_eq!(batch.ready.len(), 1);
        assert_eq!(batch.ready[0].operation.name(), "save");
        assert_eq!(batch.ready[0].operation.entity_kind(), EntityKind::Provider);

        // Unavailable store: query yields nothing, drain does nothing
        assert!(fx.router.providers().await.unwrap().is_empty());
        assert_eq!(fx.router.drain_outbox().await.unwrap(), DrainReport::default());
    }

    #[tokio::test]
    async fn failed_write_is_queued_and_replayed() {
        let fx = fixture(MemoryCapabilityStore::available());
        fx.store.set_fail_writes(true);

        let outcome = fx
            .router
            .save_appointment(date("2025-07-01"), json!({ "with": "Dr Who" }))
            .await
            .unwrap();
        assert!(outcome.queued);

        // Still failing: entry stays, retry count grows
        let report = fx.router.drain_outbox().await.unwrap();
        assert_eq!(report.failed, 1);
        let batch = fx.router.local().outbox_batch().unwrap();
        assert_eq!(batch.ready[0].retry_count, 1);

        fx.store.set_fail_writes(false);
        let report = fx.router.drain_outbox().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 0);
        assert!(fx.router.local().outbox_batch().unwrap().ready.is_empty());
        assert_eq!(fx.store.kinds_of(&outcome.record_id), vec![EntityKind::Appointment]);
    }

    #[tokio::test]
    async fn concurrent_drain_is_skipped() {
        let fx = fixture(MemoryCapabilityStore::available());
        let _held = fx.router.drain_lock.lock().await;

        let report = fx.router.drain_outbox().await.unwrap();
        assert!(report.skipped);
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn duplicate_local_save_surfaces_error() {
        let fx = fixture(MemoryCapabilityStore::available());
        let record = NewRecord::new(date("2025-06-16"), "SETTINGS", "settings", json!({}));
        fx.router.save(record.clone()).await.unwrap();

        let err = fx.router.save(record).await.unwrap_err();
        assert!(matches!(err, VaultError::DuplicateRecord { .. }));
    }

    #[tokio::test]
    async fn delete_routes_by_category() {
        let fx = fixture(MemoryCapabilityStore::available());
        let local = fx
            .router
            .save(NewRecord::new(date("2025-06-16"), "SETTINGS", "settings", json!({})))
            .await
            .unwrap();
        let remote = fx
            .router
            .save_medical_event(date("2025-06-16"), json!("MRI"))
            .await
            .unwrap();

        fx.router
            .delete(&local.record_id, "SETTINGS", "settings")
            .await
            .unwrap();
        assert_eq!(fx.router.local().count(false).unwrap(), 0);

        fx.router
            .delete(&remote.record_id, categories::MEDICAL_TIMELINE, subcategories::MEDICAL_EVENTS)
            .await
            .unwrap();
        assert!(fx.store.drafts().is_empty());
    }

    #[tokio::test]
    async fn universal_search_merges_index_and_native_hits() {
        let fx = fixture(MemoryCapabilityStore::available().with_native_search());
        let settings = fx
            .router
            .save(NewRecord::new(
                date("2025-06-16"),
                "SETTINGS",
                "settings",
                json!("aspirin reminder"),
            ))
            .await
            .unwrap();
        let event = fx
            .router
            .save_medical_event(date("2025-06-16"), json!("aspirin aspirin daily"))
            .await
            .unwrap();

        let hits = fx
            .router
            .universal_search("Aspirin", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        let ids: Vec<_> = hits.iter().map(|h| h.record_id.clone()).collect();
        assert!(ids.contains(&settings.record_id));
        assert!(ids.contains(&event.record_id));

        let only_settings = fx
            .router
            .universal_search(
                "aspirin",
                &SearchOptions {
                    limit: None,
                    categories: vec!["SETTINGS".into()],
                },
            )
            .await
            .unwrap();
        assert_eq!(only_settings.len(), 1);

        assert!(fx
            .router
            .universal_search("an", &SearchOptions::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn health_reports_counts_and_backlog() {
        let fx = fixture(MemoryCapabilityStore::unavailable());
        fx.router
            .save(NewRecord::new(date("2025-06-16"), "SETTINGS", "settings", json!({})))
            .await
            .unwrap();
        fx.router
            .save_medical_event(date("2025-06-16"), json!("queued"))
            .await
            .unwrap();

        let health = fx.router.health_check().await;
        assert!(health.local);
        assert!(!health.capability);
        assert_eq!(health.local_records, 1);
        assert_eq!(health.outbox_pending, 1);
        assert_eq!(health.outbox_dead_lettered, 0);
    }

    #[tokio::test]
    async fn online_update_waits_behind_queued_save() {
        let fx = fixture(MemoryCapabilityStore::unavailable());
        let saved = fx
            .router
            .save_medical_event(date("2025-06-16"), json!({ "title": "v1 original" }))
            .await
            .unwrap();
        assert!(saved.queued);

        fx.store.set_available(true);
        fx.router.reprobe_capability().await;
        let updated = fx
            .router
            .update(
                &saved.record_id,
                NewRecord::new(
                    date("2025-06-16"),
                    categories::MEDICAL_TIMELINE,
                    subcategories::MEDICAL_EVENTS,
                    json!({ "title": "v2 newer" }),
                ),
            )
            .await
            .unwrap();
        assert!(updated.queued);
        assert!(fx.store.drafts().is_empty());

        let report = fx.router.drain_outbox().await.unwrap();
        assert_eq!(report.processed, 2);
        let drafts = fx.store.drafts();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].content, json!({ "title": "v2 newer" }));
    }

    #[tokio::test]
    async fn failed_entry_holds_back_later_writes_for_its_record() {
        let fx = fixture(MemoryCapabilityStore::available());
        fx.store.set_fail_writes(true);
        let saved = fx
            .router
            .save_medical_event(date("2025-06-16"), json!("v1"))
            .await
            .unwrap();
        fx.router
            .delete(&saved.record_id, categories::MEDICAL_TIMELINE, subcategories::MEDICAL_EVENTS)
            .await
            .unwrap();

        let report = fx.router.drain_outbox().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.processed, 0);
        assert_eq!(fx.router.local().outbox_stats().unwrap().pending, 2);

        fx.store.set_fail_writes(false);
        let report = fx.router.drain_outbox().await.unwrap();
        assert_eq!(report.processed, 2);
        assert!(fx.store.drafts().is_empty());
    }

    #[tokio::test]
    async fn corrupt_outbox_entry_is_dead_lettered_by_drain() {
        let fx = fixture(MemoryCapabilityStore::available());
        fx.router
            .local()
            .db()
            .outbox_put("corrupt", b"not an envelope")
            .unwrap();

        let report = fx.router.drain_outbox().await.unwrap();
        assert_eq!(report.failed, 1);
        let health = fx.router.health_check().await;
        assert_eq!(health.outbox_pending, 0);
        assert_eq!(health.outbox_dead_lettered, 1);

        assert_eq!(fx.router.drain_outbox().await.unwrap(), DrainReport::default());
    }

    #[tokio::test]
    async fn deleted_records_leave_search_results() {
        let fx = fixture(MemoryCapabilityStore::available());
        let local = fx
            .router
            .save(NewRecord::new(
                date("2025-06-16"),
                "SETTINGS",
                "settings",
                json!("aspirin reminder"),
            ))
            .await
            .unwrap();
        let remote = fx
            .router
            .save_medical_event(date("2025-06-16"), json!("aspirin course"))
            .await
            .unwrap();

        fx.router
            .delete(&local.record_id, "SETTINGS", "settings")
            .await
            .unwrap();
        fx.router
            .delete(&remote.record_id, categories::MEDICAL_TIMELINE, subcategories::MEDICAL_EVENTS)
            .await
            .unwrap();

        assert!(fx
            .router
            .universal_search("aspirin", &SearchOptions::default())
            .await
            .unwrap()
            .is_empty());
    }
}
