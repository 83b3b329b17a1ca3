// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-surface session state machine.
//!
//! Each [`SessionManager`] owns two background tasks, both stopped when the
//! manager is dropped:
//!
//! - a listener that reacts to `"logout"` on the bus and to removal of the
//!   session token, moving this surface to `LoggedOut` without re-broadcasting
//! - an idle watcher that locks the session once the activity deadline passes

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bus::{BusSignal, Envelope, SessionBus, SurfaceId};
use super::remember::{DeviceFingerprint, RememberBlob};
use super::{ActivitySignal, SessionError, SessionState, REMEMBER_BLOB_KEY, SESSION_TOKEN_KEY};
use crate::crypto::{normalize_secret, random_array, CryptoError, KeyDerivation, Namespace};
use crate::storage::{KeyValueStore, MemoryKeyValueStore, StorageEvent};

/// Hint shown when the session was restored from a token alone.
const UNKNOWN_HINT: &str = "••••";

/// Everything a surface shares with the rest of the process.
#[derive(Clone)]
pub struct SessionContext {
    pub bus: SessionBus,
    pub short_lived: Arc<MemoryKeyValueStore>,
    pub persisted: Arc<dyn KeyValueStore>,
    pub keys: Arc<KeyDerivation>,
    pub fingerprint: DeviceFingerprint,
    pub idle_timeout: Duration,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: SessionContext,
    surface: SurfaceId,
    secret: Mutex<Option<SecretString>>,
    state: watch::Sender<SessionState>,
    deadline: watch::Sender<Option<Instant>>,
    shutdown: CancellationToken,
}

impl SessionManager {
    /// Create a surface in `LoggedOut`. Must be called inside a Tokio runtime.
    pub fn new(ctx: SessionContext) -> Self {
        let bus_rx = ctx.bus.subscribe();
        let storage_rx = ctx.short_lived.subscribe();
        let (state, _) = watch::channel(SessionState::LoggedOut);
        let (deadline, deadline_rx) = watch::channel(None);
        let shutdown = CancellationToken::new();

        let inner = Arc::new(Inner {
            ctx,
            surface: SurfaceId::new(),
            secret: Mutex::new(None),
            state,
            deadline,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(listen(
            Arc::downgrade(&inner),
            bus_rx,
            storage_rx,
            shutdown.clone(),
        ));
        tokio::spawn(watch_idle(Arc::downgrade(&inner), deadline_rx, shutdown));

        Self { inner }
    }

    pub fn surface(&self) -> SurfaceId {
        self.inner.surface
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Start a session for `raw_secret` and return its namespace.
    ///
    /// With `remember` the secret is also sealed into the device-bound blob;
    /// without it any existing blob is removed.
    pub async fn login(&self, raw_secret: &str, remember: bool) -> Result<Namespace, SessionError> {
        self.inner.state.send_replace(SessionState::Authenticating);
        let secret = normalize_secret(raw_secret);

        match self.establish(secret, Some(remember)).await {
            Ok(namespace) => {
                info!(namespace = %namespace, remember, "Session started");
                Ok(namespace)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.inner.end(SessionState::LoggedOut, false);
                Err(e)
            }
        }
    }

    /// Resume after a restart: from the session token (secret unknown), or
    /// from the remember blob (secret restored). A blob that no longer opens
    /// on this device is deleted.
    pub async fn restore(&self) -> Result<SessionState, SessionError> {
        if self.state().is_logged_in() {
            return Ok(self.state());
        }
        let ctx = &self.inner.ctx;

        if ctx.short_lived.get(SESSION_TOKEN_KEY)?.is_some() {
            self.inner
                .state
                .send_replace(SessionState::LoggedIn { secret_known: false });
            self.inner.arm_idle();
            info!("Session resumed from token, secret unknown");
            return Ok(self.state());
        }

        let Some(encoded) = ctx.persisted.get(REMEMBER_BLOB_KEY)? else {
            return Ok(self.state());
        };
        let installation_id = ctx.keys.installation_id()?;
        let opened = RememberBlob::decode(&encoded)
            .and_then(|blob| blob.open(&ctx.fingerprint, &installation_id));

        match opened {
            Ok(secret) => {
                self.inner.state.send_replace(SessionState::Authenticating);
                match self.establish(secret, None).await {
                    Ok(namespace) => info!(namespace = %namespace, "Session restored from remember blob"),
                    Err(e) => {
                        self.inner.end(SessionState::LoggedOut, false);
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Remember blob does not open on this device, discarding");
                ctx.persisted.remove(REMEMBER_BLOB_KEY)?;
            }
        }
        Ok(self.state())
    }

    /// End the session here and on every other surface.
    pub fn logout(&self) {
        self.inner.end(SessionState::LoggedOut, true);
        info!("Session ended");
    }

    /// Same as [`logout`](Self::logout). Persisted records of every namespace
    /// stay in place.
    pub fn switch_user(&self) {
        self.logout();
    }

    /// Idle expiry. Wipes exactly like a logout but reports `Locked`.
    pub fn lock(&self) {
        self.inner.end(SessionState::Locked, true);
        info!("Session locked");
    }

    /// Remove the session token and the remember blob.
    pub fn clear_all_session_data(&self) -> Result<(), SessionError> {
        self.inner.end(SessionState::LoggedOut, true);
        self.inner.ctx.persisted.remove(REMEMBER_BLOB_KEY)?;
        Ok(())
    }

    pub fn record_activity(&self, signal: ActivitySignal) {
        if self.state().is_logged_in() {
            debug!(?signal, "Activity, idle countdown reset");
            self.inner.arm_idle();
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The live secret, if this surface still has one.
    ///
    /// A missing session token means another surface logged out and this one
    /// missed the signal; the surface logs itself out and returns `None`.
    pub fn secret_for_crypto_ops(&self) -> Option<SecretString> {
        if !self.state().is_logged_in() {
            return None;
        }
        if !self.has_active_session() {
            debug!("Session token gone, logging out");
            self.inner.external_logout();
            return None;
        }
        self.inner
            .secret
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(duplicate)
    }

    /// Session token present in short-lived storage.
    pub fn has_active_session(&self) -> bool {
        matches!(self.inner.ctx.short_lived.get(SESSION_TOKEN_KEY), Ok(Some(_)))
    }

    /// Secret with all but its last two characters masked.
    pub fn masked_hint(&self) -> Option<String> {
        if !self.state().is_logged_in() {
            return None;
        }
        let secret = self.inner.secret.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(secret) = secret.as_ref() else {
            return Some(UNKNOWN_HINT.to_string());
        };
        let chars: Vec<char> = secret.expose_secret().chars().collect();
        let shown = chars.len().saturating_sub(2);
        Some(
            std::iter::repeat('•')
                .take(shown)
                .chain(chars[shown..].iter().copied())
                .collect(),
        )
    }

    async fn establish(
        &self,
        secret: SecretString,
        remember: Option<bool>,
    ) -> Result<Namespace, SessionError> {
        let ctx = &self.inner.ctx;

        let keys = ctx.keys.clone();
        let warm_secret = duplicate(&secret);
        let namespace = tokio::task::spawn_blocking(move || keys.warm(&warm_secret))
            .await
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))??;

        match remember {
            Some(true) => {
                let installation_id = ctx.keys.installation_id()?;
                let blob = RememberBlob::seal(&secret, &ctx.fingerprint, &installation_id)?;
                ctx.persisted.set(REMEMBER_BLOB_KEY, &blob.encode()?)?;
            }
            Some(false) => ctx.persisted.remove(REMEMBER_BLOB_KEY)?,
            None => {}
        }

        ctx.short_lived.set(SESSION_TOKEN_KEY, &mint_token()?)?;
        *self.inner.secret.lock().unwrap_or_else(PoisonError::into_inner) = Some(secret);
        self.inner
            .state
            .send_replace(SessionState::LoggedIn { secret_known: true });
        self.inner.arm_idle();
        Ok(namespace)
    }
}

impl Inner {
    fn arm_idle(&self) {
        self.deadline
            .send_replace(Some(Instant::now() + self.ctx.idle_timeout));
    }

    /// Wipe the secret and move to `next`. With `propagate` the shared token
    /// is cleared and the other surfaces are told.
    fn end(&self, next: SessionState, propagate: bool) {
        self.secret
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.deadline.send_replace(None);
        // State first, so our own listener ignores the token removal below
        self.state.send_replace(next);

        if propagate {
            if let Err(e) = self.ctx.short_lived.remove(SESSION_TOKEN_KEY) {
                warn!(error = %e, "Failed to clear session token");
            }
            self.ctx.bus.publish(self.surface, BusSignal::Logout);
        }
    }

    /// Logout triggered elsewhere. Idempotent and never re-broadcast.
    fn external_logout(&self) {
        let current = *self.state.borrow();
        if current.is_logged_in() || current == SessionState::Authenticating {
            self.end(SessionState::LoggedOut, false);
            info!("Session ended by another surface");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Four random 32-bit values joined by `-`. Carries nothing about the secret.
fn mint_token() -> Result<String, CryptoError> {
    let bytes = random_array::<16>()?;
    Ok(bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]).to_string())
        .collect::<Vec<_>>()
        .join("-"))
}

fn duplicate(secret: &SecretString) -> SecretString {
    SecretString::new(secret.expose_secret().clone())
}

async fn listen(
    inner: Weak<Inner>,
    mut bus: broadcast::Receiver<Envelope>,
    mut storage: broadcast::Receiver<StorageEvent>,
    shutdown: CancellationToken,
) {
    use broadcast::error::RecvError;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            message = bus.recv() => match message {
                Ok(envelope) => {
                    let Some(inner) = inner.upgrade() else { return };
                    if envelope.origin != inner.surface && envelope.signal == BusSignal::Logout {
                        inner.external_logout();
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Session bus lagged"),
                Err(RecvError::Closed) => return,
            },
            event = storage.recv() => match event {
                Ok(event) if event.key == SESSION_TOKEN_KEY && event.new_value.is_none() => {
                    let Some(inner) = inner.upgrade() else { return };
                    inner.external_logout();
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Storage events lagged"),
                Err(RecvError::Closed) => return,
            },
        }
    }
}

async fn watch_idle(
    inner: Weak<Inner>,
    mut deadline: watch::Receiver<Option<Instant>>,
    shutdown: CancellationToken,
) {
    loop {
        let next = *deadline.borrow_and_update();
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = deadline.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = sleep_until(next) => {
                let Some(inner) = inner.upgrade() else { return };
                info!("Session idle, locking");
                inner.end(SessionState::Locked, true);
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
