// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::error;

use crate::crypto::CryptoError;
use crate::session::SessionError;
use crate::storage::StoreError;

// =============================================================================
// VaultError
// =============================================================================

/// Failures surfaced by vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Higher-capability store unreachable. Writes fall back to the outbox.
    #[error("higher-capability store unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("record already exists for {date}/{category}/{subcategory}")]
    DuplicateRecord {
        date: NaiveDate,
        category: String,
        subcategory: String,
    },

    #[error("outbox entry {id} failed to replay: {reason}")]
    OutboxReplayFailed { id: String, reason: String },

    #[error("session expired")]
    SessionExpired,

    #[error("not logged in")]
    NotLoggedIn,

    /// Token-only session: the secret has to be entered again.
    #[error("secret not available in this session")]
    SecretUnavailable,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateRecord {
                date,
                category,
                subcategory,
            } => Self::DuplicateRecord {
                date,
                category,
                subcategory,
            },
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Crypto(e) => e.into(),
            other => Self::Store(other),
        }
    }
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyDerivationFailed(reason) => Self::KeyDerivationFailed(reason),
            CryptoError::DecryptionFailed | CryptoError::Malformed(_) => Self::DecryptionFailed,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<SessionError> for VaultError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Crypto(e) => e.into(),
            SessionError::Store(e) => e.into(),
        }
    }
}

// =============================================================================
// ApiError
// =============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        let status = match &err {
            VaultError::DuplicateRecord { .. } => StatusCode::CONFLICT,
            VaultError::NotLoggedIn | VaultError::SessionExpired | VaultError::SecretUnavailable => {
                StatusCode::UNAUTHORIZED
            }
            VaultError::NotFound(_) => StatusCode::NOT_FOUND,
            VaultError::CapabilityUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            VaultError::DecryptionFailed => StatusCode::UNPROCESSABLE_ENTITY,
            VaultError::KeyDerivationFailed(_)
            | VaultError::OutboxReplayFailed { .. }
            | VaultError::Store(_)
            | VaultError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %err, "Request failed");
            // Don't leak storage internals to callers
            return Self::new(status, "internal error");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}
