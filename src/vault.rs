// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Vault
//!
//! Application root. A [`VaultHost`] owns everything shared by the process:
//! device storage, key derivation, the session bus, the router registry and
//! the drain schedulers. Each UI surface gets its own [`Vault`] with an
//! independent [`SessionManager`].
//!
//! ## Lifetimes
//!
//! - Routers are opened lazily on the first data operation of a session.
//! - Any logout or lock releases every router, and with them the content
//!   keys. Persisted records stay on disk.
//! - One drain scheduler runs per open namespace when background draining
//!   is enabled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capability::{CapabilityConnector, DisabledConnector, MedicalDatabaseConnector};
use crate::config::VaultConfig;
use crate::crypto::{KeyDerivation, Namespace};
use crate::error::VaultError;
use crate::router::{
    DrainReport, DrainScheduler, HealthReport, HybridRouter, RouterRegistry, SaveOutcome,
    SearchHit, SearchOptions, Visibility,
};
use crate::session::{
    ActivitySignal, DeviceFingerprint, SessionBus, SessionContext, SessionManager, SessionState,
};
use crate::storage::{
    DataRecord, KeyValueStore, MemoryKeyValueStore, NewRecord, RecordFilter, RecordId,
    RedbKeyValueStore,
};

// =============================================================================
// VaultHost
// =============================================================================

pub struct VaultHost {
    config: VaultConfig,
    bus: SessionBus,
    short_lived: Arc<MemoryKeyValueStore>,
    persisted: Arc<dyn KeyValueStore>,
    keys: Arc<KeyDerivation>,
    registry: RouterRegistry,
    fingerprint: DeviceFingerprint,
    visibility: watch::Sender<Visibility>,
    schedulers: Mutex<HashMap<Namespace, CancellationToken>>,
    shutdown: CancellationToken,
}

impl VaultHost {
    /// Open device storage under `config.paths`. Must be called inside a
    /// Tokio runtime.
    pub fn open(
        config: VaultConfig,
        connector: Arc<dyn CapabilityConnector>,
        fingerprint: DeviceFingerprint,
    ) -> Result<Arc<Self>, VaultError> {
        let persisted: Arc<dyn KeyValueStore> =
            Arc::new(RedbKeyValueStore::open(&config.paths.device_db())?);
        let keys = Arc::new(KeyDerivation::new(persisted.clone(), config.kdf_iterations));
        let registry = RouterRegistry::new(
            config.paths.clone(),
            config.routing.clone(),
            config.outbox_policy,
            connector,
        );
        let (visibility, _) = watch::channel(Visibility::Visible);

        info!(
            data_dir = %config.paths.root().display(),
            kdf_iterations = keys.iterations(),
            background_drain = config.background_drain,
            "Vault host opened"
        );

        Ok(Arc::new(Self {
            config,
            bus: SessionBus::new(),
            short_lived: Arc::new(MemoryKeyValueStore::new()),
            persisted,
            keys,
            registry,
            fingerprint,
            visibility,
            schedulers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }))
    }

    /// Connector chosen by `config.capability_store`.
    pub fn connector_for(config: &VaultConfig) -> Arc<dyn CapabilityConnector> {
        if config.capability_store {
            Arc::new(MedicalDatabaseConnector::new(config.paths.clone()))
        } else {
            Arc::new(DisabledConnector)
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn registry(&self) -> &RouterRegistry {
        &self.registry
    }

    /// A new surface with its own session, starting logged out.
    pub fn open_surface(self: &Arc<Self>) -> Vault {
        let session = SessionManager::new(SessionContext {
            bus: self.bus.clone(),
            short_lived: self.short_lived.clone(),
            persisted: self.persisted.clone(),
            keys: self.keys.clone(),
            fingerprint: self.fingerprint.clone(),
            idle_timeout: self.config.idle_timeout,
        });

        let mut states = session.subscribe();
        let host = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    changed = states.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let state = *states.borrow_and_update();
                        if matches!(state, SessionState::LoggedOut | SessionState::Locked) {
                            let Some(host) = host.upgrade() else { return };
                            host.release_routers();
                        }
                    }
                }
            }
        });

        Vault {
            host: self.clone(),
            session,
        }
    }

    /// Stop every scheduler and drop every router.
    pub fn release_routers(&self) {
        let mut schedulers = self.schedulers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, token) in schedulers.drain() {
            token.cancel();
        }
        drop(schedulers);
        self.registry.clear();
    }

    /// Stop background work. Routers are released; nothing on disk changes.
    pub fn close(&self) {
        self.shutdown.cancel();
        self.release_routers();
        info!("Vault host closed");
    }

    fn ensure_scheduler(&self, router: &Arc<HybridRouter>) {
        if !self.config.background_drain {
            return;
        }
        let mut schedulers = self.schedulers.lock().unwrap_or_else(PoisonError::into_inner);
        if schedulers.contains_key(router.namespace()) {
            return;
        }

        let token = self.shutdown.child_token();
        schedulers.insert(router.namespace().clone(), token.clone());
        let scheduler =
            DrainScheduler::new(router, self.config.drain_interval, self.visibility.subscribe());
        tokio::spawn(scheduler.run(token));
    }
}

// =============================================================================
// Vault (one per surface)
// =============================================================================

pub struct Vault {
    host: Arc<VaultHost>,
    session: SessionManager,
}

impl Vault {
    pub fn host(&self) -> &Arc<VaultHost> {
        &self.host
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub async fn login(&self, secret: &str, remember: bool) -> Result<Namespace, VaultError> {
        Ok(self.session.login(secret, remember).await?)
    }

    pub async fn restore(&self) -> Result<SessionState, VaultError> {
        Ok(self.session.restore().await?)
    }

    pub fn logout(&self) {
        self.session.logout();
        self.host.release_routers();
    }

    pub fn lock(&self) {
        self.session.lock();
        self.host.release_routers();
    }

    pub fn record_activity(&self, signal: ActivitySignal) {
        self.session.record_activity(signal);
        if let ActivitySignal::VisibilityChange { visible } = signal {
            let next = if visible {
                Visibility::Visible
            } else {
                Visibility::Hidden
            };
            self.host.visibility.send_replace(next);
        }
    }

    /// The router for the logged-in namespace, opening it on first use.
    pub async fn router(&self) -> Result<Arc<HybridRouter>, VaultError> {
        match self.session.state() {
            SessionState::LoggedIn { .. } => {}
            SessionState::Locked => return Err(VaultError::SessionExpired),
            SessionState::LoggedOut | SessionState::Authenticating => {
                return Err(VaultError::NotLoggedIn)
            }
        }

        let Some(secret) = self.session.secret_for_crypto_ops() else {
            return Err(if self.session.state().is_logged_in() {
                VaultError::SecretUnavailable
            } else {
                VaultError::NotLoggedIn
            });
        };

        let namespace = self.host.keys.namespace_id(&secret)?;
        let keys = self.host.keys.clone();
        let router = self
            .host
            .registry
            .get_or_open(&namespace, || async move {
                tokio::task::spawn_blocking(move || keys.content_key(&secret))
                    .await
                    .map_err(|e| VaultError::Internal(e.to_string()))?
                    .map_err(VaultError::from)
            })
            .await?;

        // The session may have ended while the key was being derived
        if !self.session.state().is_logged_in() {
            debug!(namespace = %namespace, "Session ended during router open");
            drop(router);
            self.host.registry.remove(&namespace);
            return Err(VaultError::NotLoggedIn);
        }

        self.host.ensure_scheduler(&router);
        Ok(router)
    }

    // =========================================================================
    // Data Operations
    // =========================================================================

    pub async fn save(&self, record: NewRecord) -> Result<SaveOutcome, VaultError> {
        self.router().await?.save(record).await
    }

    pub async fn update(&self, id: &RecordId, record: NewRecord) -> Result<SaveOutcome, VaultError> {
        self.router().await?.update(id, record).await
    }

    pub async fn delete(
        &self,
        id: &RecordId,
        category: &str,
        subcategory: &str,
    ) -> Result<SaveOutcome, VaultError> {
        self.router().await?.delete(id, category, subcategory).await
    }

    pub async fn query(&self, filter: &RecordFilter) -> Result<Vec<DataRecord>, VaultError> {
        self.router().await?.query(filter).await
    }

    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, VaultError> {
        self.router().await?.universal_search(query, options).await
    }

    pub async fn drain_outbox(&self) -> Result<DrainReport, VaultError> {
        self.router().await?.drain_outbox().await
    }

    pub async fn health(&self) -> Result<HealthReport, VaultError> {
        Ok(self.router().await?.health_check().await)
    }

    /// Explicit user-initiated retry of the higher-capability store.
    pub async fn reprobe_capability(&self) -> Result<(), VaultError> {
        self.router().await?.reprobe_capability().await;
        Ok(())
    }
}
