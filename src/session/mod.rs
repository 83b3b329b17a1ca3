// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Lifecycle
//!
//! Holds the user's secret in memory for the life of a session and keeps
//! every surface of the process in agreement about who is logged in.
//!
//! ## States
//!
//! ```text
//! LoggedOut -> Authenticating -> LoggedIn -> Locked | LoggedOut
//! ```
//!
//! `Locked` is entered on idle expiry. It wipes the secret and token exactly
//! like a logout and only differs in how the surface reports it.
//!
//! ## Coordination
//!
//! - [`bus::SessionBus`] - best-effort `"logout"` broadcast between surfaces
//! - short-lived storage - the session token; its removal is the second signal
//! - [`remember`] - optional device-bound blob for silent restoration

pub mod bus;
pub mod manager;
pub mod remember;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::crypto::CryptoError;
use crate::storage::StoreError;

pub use bus::{BusSignal, SessionBus, SurfaceId};
pub use manager::{SessionContext, SessionManager};
pub use remember::{DeviceFingerprint, RememberBlob};

/// Short-lived storage key of the opaque session token.
pub const SESSION_TOKEN_KEY: &str = "pinvault.session.token";

/// Persisted storage key of the remember blob.
pub const REMEMBER_BLOB_KEY: &str = "pinvault.session.remember";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    LoggedOut,
    Authenticating,
    /// `secret_known` is false after a token-only restoration.
    LoggedIn { secret_known: bool },
    Locked,
}

impl SessionState {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, Self::LoggedIn { .. })
    }
}

/// User activity that resets the idle countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivitySignal {
    PointerDown,
    KeyDown,
    Scroll,
    VisibilityChange { visible: bool },
}
