// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Availability detection for the higher-capability store.
//!
//! The first caller connects and pings; the outcome is memoized until
//! [`CapabilityProbe::reset`]. Concurrent callers wait on the same probe.
//! A store that does not implement `ping` counts as unavailable.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{CapabilityConnector, CapabilityError, CapabilityStore};
use crate::crypto::Namespace;

enum ProbeState {
    Unprobed,
    Available(Arc<dyn CapabilityStore>),
    Unavailable,
}

pub struct CapabilityProbe {
    connector: Arc<dyn CapabilityConnector>,
    namespace: Namespace,
    state: Mutex<ProbeState>,
}

impl CapabilityProbe {
    pub fn new(connector: Arc<dyn CapabilityConnector>, namespace: Namespace) -> Self {
        Self {
            connector,
            namespace,
            state: Mutex::new(ProbeState::Unprobed),
        }
    }

    /// Store handle if available, probing on first use.
    pub async fn handle(&self) -> Option<Arc<dyn CapabilityStore>> {
        let mut state = self.state.lock().await;
        if matches!(*state, ProbeState::Unprobed) {
            *state = self.detect().await;
        }
        match &*state {
            ProbeState::Available(store) => Some(store.clone()),
            ProbeState::Unprobed | ProbeState::Unavailable => None,
        }
    }

    pub async fn is_available(&self) -> bool {
        self.handle().await.is_some()
    }

    /// Forget the memoized result; the next call probes again.
    pub async fn reset(&self) {
        *self.state.lock().await = ProbeState::Unprobed;
    }

    async fn detect(&self) -> ProbeState {
        let store = match self.connector.connect(&self.namespace).await {
            Ok(store) => store,
            Err(e) => {
                info!(
                    namespace = %self.namespace,
                    error = %e,
                    "Higher-capability store unavailable, using local store only"
                );
                return ProbeState::Unavailable;
            }
        };

        match store.ping().await {
            Ok(()) => {
                info!(namespace = %self.namespace, "Higher-capability store available");
                ProbeState::Available(store)
            }
            Err(CapabilityError::PingUnsupported) => {
                warn!(
                    namespace = %self.namespace,
                    "Higher-capability store has no ping, treating as unavailable"
                );
                ProbeState::Unavailable
            }
            Err(e) => {
                warn!(
                    namespace = %self.namespace,
                    error = %e,
                    "Higher-capability store failed ping"
                );
                ProbeState::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCapabilityStore, MemoryConnector};

    fn namespace() -> Namespace {
        Namespace::parse("pinvault_0123456789abcdef01234567").unwrap()
    }

    #[tokio::test]
    async fn result_is_memoized_until_reset() {
        let store = MemoryCapabilityStore::unavailable();
        let connector = MemoryConnector::new(store.clone());
        let probe = CapabilityProbe::new(connector.clone(), namespace());

        assert!(!probe.is_available().await);
        store.set_available(true);
        // Still memoized as unavailable
        assert!(!probe.is_available().await);
        assert_eq!(connector.connects(), 1);

        probe.reset().await;
        assert!(probe.is_available().await);
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn missing_ping_counts_as_unavailable() {
        let store = MemoryCapabilityStore::available().without_ping();
        let probe = CapabilityProbe::new(MemoryConnector::new(store), namespace());
        assert!(!probe.is_available().await);
    }

    #[tokio::test]
    async fn failing_ping_counts_as_unavailable() {
        let store = MemoryCapabilityStore::available();
        store.set_ping_fails(true);
        let probe = CapabilityProbe::new(MemoryConnector::new(store), namespace());
        assert!(!probe.is_available().await);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_probe() {
        let store = MemoryCapabilityStore::available();
        let connector = MemoryConnector::new(store);
        let probe = Arc::new(CapabilityProbe::new(connector.clone(), namespace()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let probe = probe.clone();
                tokio::spawn(async move { probe.is_available().await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(connector.connects(), 1);
    }
}
