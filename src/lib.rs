// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PinVault - PIN-Keyed Local Data Vault
//!
//! This crate stores a user's personal records encrypted under a key derived
//! from their PIN, routes medical records to a higher-capability store when
//! one is available, and queues writes in an outbox while it is not.
//!
//! ## Modules
//!
//! - `api` - Local HTTP surface (Axum)
//! - `capability` - Higher-capability store connector and probe
//! - `crypto` - Key derivation and AES-256-GCM envelopes
//! - `router` - Hybrid routing, outbox draining, universal search
//! - `session` - PIN session lifecycle, remember-me, cross-surface logout
//! - `storage` - Per-namespace encrypted store (redb)
//! - `vault` - Host and surface wiring

pub mod api;
pub mod capability;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod router;
pub mod session;
pub mod state;
pub mod storage;
pub mod vault;

#[cfg(test)]
mod testing;
