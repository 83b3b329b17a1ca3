// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Outbox Drain Scheduler
//!
//! Background task that drains one router's outbox:
//!
//! 1. once immediately when it starts,
//! 2. every `interval` (default 30 s, never less than one second),
//! 3. whenever the application returns to the foreground.
//!
//! The scheduler only holds a weak reference to its router and exits once
//! the router has been released.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::HybridRouter;

/// Shortest period between background drains.
pub const MIN_DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Foreground state of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

pub struct DrainScheduler {
    router: Weak<HybridRouter>,
    interval: Duration,
    visibility: watch::Receiver<Visibility>,
}

impl DrainScheduler {
    pub fn new(
        router: &Arc<HybridRouter>,
        interval: Duration,
        visibility: watch::Receiver<Visibility>,
    ) -> Self {
        Self {
            router: Arc::downgrade(router),
            interval: interval.max(MIN_DRAIN_INTERVAL),
            visibility,
        }
    }

    /// Run until cancelled or until the router is dropped.
    ///
    /// ```rust,ignore
    /// tokio::spawn(scheduler.run(shutdown.child_token()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            router,
            interval,
            visibility,
        } = self;
        let mut visibility = Some(visibility);

        info!(interval_secs = interval.as_secs(), "Outbox drain scheduler starting");

        loop {
            if shutdown.is_cancelled() {
                info!("Outbox drain scheduler shutting down");
                return;
            }

            let Some(current) = router.upgrade() else {
                debug!("Router released, drain scheduler exiting");
                return;
            };
            match current.drain_outbox().await {
                Ok(report) if report.skipped => debug!("Drain skipped, another is running"),
                Ok(_) => {}
                Err(e) => warn!(namespace = %current.namespace(), error = %e, "Outbox drain failed"),
            }
            drop(current);

            // Wait for the next trigger
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => break,
                    changed = foreground(&mut visibility) => {
                        if changed {
                            debug!("Application foregrounded, draining outbox");
                            break;
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("Outbox drain scheduler shutting down");
                        return;
                    }
                }
            }
        }
    }
}

/// Resolves on the next visibility change: `true` when the application became
/// visible. Once the sender is gone this never resolves.
async fn foreground(visibility: &mut Option<watch::Receiver<Visibility>>) -> bool {
    let Some(rx) = visibility.as_mut() else {
        return std::future::pending().await;
    };
    match rx.changed().await {
        Ok(()) => *rx.borrow_and_update() == Visibility::Visible,
        Err(_) => {
            *visibility = None;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{ContentKey, Namespace};
    use crate::router::RoutingTable;
    use crate::storage::{EncryptedStore, OutboxPolicy};
    use crate::testing::{MemoryCapabilityStore, MemoryConnector};
    use serde_json::json;

    fn router(dir: &tempfile::TempDir, store: Arc<MemoryCapabilityStore>) -> Arc<HybridRouter> {
        let local = EncryptedStore::open(
            &dir.path().join("ns.redb"),
            Namespace::parse("pinvault_0123456789abcdef01234567").unwrap(),
            ContentKey::from_bytes([8u8; 32]),
        )
        .unwrap();
        Arc::new(HybridRouter::new(
            local,
            MemoryConnector::new(store),
            RoutingTable::default(),
            OutboxPolicy::immediate(),
        ))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn drains_once_on_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryCapabilityStore::available();
        store.set_fail_writes(true);
        let router = router(&dir, store.clone());
        router
            .save_medical_event("2025-06-16".parse().unwrap(), json!("queued"))
            .await
            .unwrap();
        store.set_fail_writes(false);

        let (_tx, rx) = watch::channel(Visibility::Visible);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(
            DrainScheduler::new(&router, Duration::from_secs(3600), rx).run(shutdown.clone()),
        );

        wait_until(|| store.drafts().len() == 1).await;
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn foregrounding_triggers_a_drain() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryCapabilityStore::available();
        let router = router(&dir, store.clone());

        let (tx, rx) = watch::channel(Visibility::Hidden);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(
            DrainScheduler::new(&router, Duration::from_secs(3600), rx).run(shutdown.clone()),
        );

        // Queue after the initial drain has run
        store.set_fail_writes(true);
        router
            .save_medical_event("2025-06-16".parse().unwrap(), json!("later"))
            .await
            .unwrap();
        store.set_fail_writes(false);
        assert!(store.drafts().is_empty());

        tx.send(Visibility::Visible).unwrap();
        wait_until(|| store.drafts().len() == 1).await;

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn exits_when_router_is_released() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, MemoryCapabilityStore::available());
        let (_tx, rx) = watch::channel(Visibility::Visible);
        let scheduler = DrainScheduler::new(&router, Duration::from_millis(10), rx);
        drop(router);

        // Returns on its own without cancellation
        scheduler.run(CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn zero_interval_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, MemoryCapabilityStore::available());
        let (_tx, rx) = watch::channel(Visibility::Visible);

        let scheduler = DrainScheduler::new(&router, Duration::ZERO, rx);
        assert_eq!(scheduler.interval, MIN_DRAIN_INTERVAL);
    }
}
