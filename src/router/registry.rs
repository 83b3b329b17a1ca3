// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One [`HybridRouter`] per namespace.
//!
//! Concurrent first requests for the same namespace share a single
//! construction. A failed construction leaves the slot empty so the next
//! request retries. [`RouterRegistry::clear`] drops every router, and with
//! them their content keys.
//!
//! A released router that is still held elsewhere keeps its database open.
//! The registry remembers it weakly and hands the same router back when the
//! namespace is opened again, since redb allows one handle per file.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{HybridRouter, RoutingTable};
use crate::capability::CapabilityConnector;
use crate::crypto::{ContentKey, Namespace};
use crate::error::VaultError;
use crate::storage::{EncryptedStore, NamespaceDb, OutboxPolicy, StoragePaths, StoreError};

type Slot = Arc<OnceCell<Arc<HybridRouter>>>;

/// Attempts to open a database whose last router is still being dropped.
const OPEN_ATTEMPTS: usize = 20;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(10);

pub struct RouterRegistry {
    paths: StoragePaths,
    routing: RoutingTable,
    policy: OutboxPolicy,
    connector: Arc<dyn CapabilityConnector>,
    routers: Mutex<HashMap<Namespace, Slot>>,
    released: Mutex<HashMap<Namespace, Weak<HybridRouter>>>,
    opened: AtomicUsize,
}

impl RouterRegistry {
    pub fn new(
        paths: StoragePaths,
        routing: RoutingTable,
        policy: OutboxPolicy,
        connector: Arc<dyn CapabilityConnector>,
    ) -> Self {
        Self {
            paths,
            routing,
            policy,
            connector,
            routers: Mutex::new(HashMap::new()),
            released: Mutex::new(HashMap::new()),
            opened: AtomicUsize::new(0),
        }
    }

    /// Router for `namespace`, constructing it on first use.
    ///
    /// `derive_key` runs only when the router has to be built. A released
    /// router that is still alive is reused and re-probed instead.
    pub async fn get_or_open<F, Fut>(
        &self,
        namespace: &Namespace,
        derive_key: F,
    ) -> Result<Arc<HybridRouter>, VaultError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ContentKey, VaultError>>,
    {
        let slot = self
            .routers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(namespace.clone())
            .or_default()
            .clone();

        let router = slot
            .get_or_try_init(|| async move {
                if let Some(router) = self.take_released(namespace) {
                    info!(namespace = %namespace, "Reusing released namespace router");
                    router.reprobe_capability().await;
                    return Ok(router);
                }
                let key = derive_key().await?;
                self.open(namespace, key).await
            })
            .await?;
        Ok(router.clone())
    }

    /// Already-open router, if any.
    pub fn get(&self, namespace: &Namespace) -> Option<Arc<HybridRouter>> {
        self.routers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .and_then(|slot| slot.get().cloned())
    }

    pub fn remove(&self, namespace: &Namespace) {
        let slot = self
            .routers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(namespace);
        if let Some(router) = slot.as_ref().and_then(|slot| slot.get()) {
            self.remember_released(namespace, router);
        }
    }

    /// Drop every router. Returns how many were open.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self
            .routers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let mut open = 0;
        for (namespace, slot) in &drained {
            if let Some(router) = slot.get() {
                self.remember_released(namespace, router);
                open += 1;
            }
        }
        if open > 0 {
            info!(routers = open, "Released namespace routers");
        }
        open
    }

    /// Number of routers constructed over the registry's lifetime.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn remember_released(&self, namespace: &Namespace, router: &Arc<HybridRouter>) {
        let mut released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        released.retain(|_, weak| weak.strong_count() > 0);
        released.insert(namespace.clone(), Arc::downgrade(router));
    }

    fn take_released(&self, namespace: &Namespace) -> Option<Arc<HybridRouter>> {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(namespace)
            .and_then(|weak| weak.upgrade())
    }

    async fn open(
        &self,
        namespace: &Namespace,
        key: ContentKey,
    ) -> Result<Arc<HybridRouter>, VaultError> {
        let path = self.paths.namespace_db(namespace);
        let mut attempt = 1;
        let db = loop {
            match NamespaceDb::open(&path) {
                Err(StoreError::RedbDatabase(redb::DatabaseError::DatabaseAlreadyOpen))
                    if attempt < OPEN_ATTEMPTS =>
                {
                    debug!(namespace = %namespace, attempt, "Namespace database still held, retrying");
                    attempt += 1;
                    tokio::time::sleep(OPEN_RETRY_DELAY).await;
                }
                other => break other?,
            }
        };
        let local = EncryptedStore::new(Arc::new(db), namespace.clone(), key);
        let router = HybridRouter::new(
            local,
            self.connector.clone(),
            self.routing.clone(),
            self.policy,
        );
        self.opened.fetch_add(1, Ordering::SeqCst);
        info!(namespace = %namespace, "Opened namespace router");
        Ok(Arc::new(router))
    }
}
