// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Test doubles shared by unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::capability::{
    CapabilityConnector, CapabilityError, CapabilityStore, EntityKind, NativeHit, RecordDraft,
};
use crate::config::VaultConfig;
use crate::crypto::Namespace;
use crate::session::DeviceFingerprint;
use crate::state::AppState;
use crate::storage::records::{RecordFilter, RecordId};
use crate::storage::OutboxPolicy;
use crate::vault::VaultHost;

/// In-memory higher-capability store with switchable availability and
/// failure injection.
pub struct MemoryCapabilityStore {
    available: AtomicBool,
    fail_writes: AtomicBool,
    ping_fails: AtomicBool,
    supports_ping: AtomicBool,
    native_search: AtomicBool,
    entities: Mutex<HashMap<(EntityKind, RecordId), RecordDraft>>,
}

impl MemoryCapabilityStore {
    fn with_availability(available: bool) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(available),
            fail_writes: AtomicBool::new(false),
            ping_fails: AtomicBool::new(false),
            supports_ping: AtomicBool::new(true),
            native_search: AtomicBool::new(false),
            entities: Mutex::new(HashMap::new()),
        })
    }

    pub fn available() -> Arc<Self> {
        Self::with_availability(true)
    }

    pub fn unavailable() -> Arc<Self> {
        Self::with_availability(false)
    }

    pub fn without_ping(self: Arc<Self>) -> Arc<Self> {
        self.supports_ping.store(false, Ordering::SeqCst);
        self
    }

    pub fn with_native_search(self: Arc<Self>) -> Arc<Self> {
        self.native_search.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_ping_fails(&self, fail: bool) {
        self.ping_fails.store(fail, Ordering::SeqCst);
    }

    /// Kinds under which `id` is currently stored.
    pub fn kinds_of(&self, id: &RecordId) -> Vec<EntityKind> {
        self.entities
            .lock()
            .unwrap()
            .keys()
            .filter(|(_, stored)| stored == id)
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn drafts(&self) -> Vec<RecordDraft> {
        self.entities.lock().unwrap().values().cloned().collect()
    }

    fn check_write(&self) -> Result<(), CapabilityError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CapabilityError::Unavailable("offline".into()));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CapabilityError::Backend("injected failure".into()));
        }
        Ok(())
    }

    fn put(&self, kind: EntityKind, draft: &RecordDraft) -> Result<(), CapabilityError> {
        self.check_write()?;
        self.entities
            .lock()
            .unwrap()
            .insert((kind, draft.id.clone()), draft.clone());
        Ok(())
    }
}

#[async_trait]
impl CapabilityStore for MemoryCapabilityStore {
    async fn ping(&self) -> Result<(), CapabilityError> {
        if !self.supports_ping.load(Ordering::SeqCst) {
            return Err(CapabilityError::PingUnsupported);
        }
        if self.ping_fails.load(Ordering::SeqCst) || !self.available.load(Ordering::SeqCst) {
            return Err(CapabilityError::Unavailable("ping failed".into()));
        }
        Ok(())
    }

    async fn save_medical_event(&self, draft: &RecordDraft) -> Result<(), CapabilityError> {
        self.put(EntityKind::MedicalEvent, draft)
    }

    async fn save_provider(&self, draft: &RecordDraft) -> Result<(), CapabilityError> {
        self.put(EntityKind::Provider, draft)
    }

    async fn save_appointment(&self, draft: &RecordDraft) -> Result<(), CapabilityError> {
        self.put(EntityKind::Appointment, draft)
    }

    async fn save_generic(&self, draft: &RecordDraft) -> Result<(), CapabilityError> {
        self.put(EntityKind::GenericRecord, draft)
    }

    async fn delete_entity(&self, kind: EntityKind, id: &RecordId) -> Result<(), CapabilityError> {
        self.check_write()?;
        self.entities.lock().unwrap().remove(&(kind, id.clone()));
        Ok(())
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<RecordDraft>, CapabilityError> {
        let mut out: Vec<RecordDraft> = self
            .drafts()
            .into_iter()
            .filter(|d| filter.matches(d.date, &d.category, &d.subcategory, &d.tags, false))
            .collect();
        out.sort_by(|a, b| a.date.cmp(&b.date).then(a.created_at.cmp(&b.created_at)));
        Ok(out)
    }

    async fn search(&self, query: &str) -> Result<Option<Vec<NativeHit>>, CapabilityError> {
        if !self.native_search.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let query = query.to_lowercase();
        let terms: Vec<&str> = query.split_whitespace().collect();
        let hits = self
            .drafts()
            .into_iter()
            .filter_map(|d| {
                let text = d.content.to_string().to_lowercase();
                terms.iter().any(|t| text.contains(t)).then(|| NativeHit {
                    record_id: d.id,
                    record_type: d.category,
                    text,
                })
            })
            .collect();
        Ok(Some(hits))
    }

    async fn count(&self) -> Result<u64, CapabilityError> {
        Ok(self.entities.lock().unwrap().len() as u64)
    }
}

/// Connector handing out one shared [`MemoryCapabilityStore`].
pub struct MemoryConnector {
    store: Arc<MemoryCapabilityStore>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryCapabilityStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityConnector for MemoryConnector {
    async fn connect(
        &self,
        _namespace: &Namespace,
    ) -> Result<Arc<dyn CapabilityStore>, CapabilityError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.store.available.load(Ordering::SeqCst) {
            return Err(CapabilityError::Unavailable("offline".into()));
        }
        Ok(self.store.clone())
    }
}

/// Config rooted at `dir` with background draining off and immediate retries.
pub fn test_config(dir: &Path) -> VaultConfig {
    let mut config = VaultConfig::for_data_dir(dir);
    config.background_drain = false;
    config.outbox_policy = OutboxPolicy::immediate();
    config.idle_timeout = Duration::from_secs(300);
    config
}

/// Host on `dir` backed by `store`, with a fixed device fingerprint.
pub fn test_host(dir: &Path, store: Arc<MemoryCapabilityStore>) -> Arc<VaultHost> {
    VaultHost::open(
        test_config(dir),
        MemoryConnector::new(store),
        DeviceFingerprint::new(["test", "device"]),
    )
    .unwrap()
}

/// Handler state with one logged-out surface.
pub fn test_state(dir: &Path) -> AppState {
    AppState::new(test_host(dir, MemoryCapabilityStore::available()).open_surface())
}
