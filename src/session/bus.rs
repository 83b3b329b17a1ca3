// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Best-effort message bus shared by every surface of the process.
//!
//! Delivery is at-least-once at best: a surface that lags or is not yet
//! subscribed misses messages and catches up through the session token.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

const BUS_CAPACITY: usize = 16;

/// Identity of one surface, used to ignore our own broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(Uuid);

impl SurfaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SurfaceId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusSignal {
    Logout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub origin: SurfaceId,
    pub signal: BusSignal,
}

#[derive(Debug, Clone)]
pub struct SessionBus {
    tx: broadcast::Sender<Envelope>,
}

impl SessionBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, origin: SurfaceId, signal: BusSignal) {
        // Nobody listening is fine.
        let _ = self.tx.send(Envelope { origin, signal });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logout_wire_literal() {
        assert_eq!(serde_json::to_string(&BusSignal::Logout).unwrap(), r#""logout""#);
    }

    #[tokio::test]
    async fn subscribers_receive_origin() {
        let bus = SessionBus::new();
        let mut rx = bus.subscribe();
        let origin = SurfaceId::new();

        bus.publish(origin, BusSignal::Logout);
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.origin, origin);
        assert_eq!(envelope.signal, BusSignal::Logout);
    }
}
