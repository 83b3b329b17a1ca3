// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use crate::{error::ApiError, router::DrainReport, state::AppState};

/// Replay due outbox entries against the higher-capability store.
#[utoipa::path(
    post,
    path = "/v1/outbox/drain",
    tag = "Outbox",
    responses(
        (status = 200, body = DrainReport),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn drain(State(state): State<AppState>) -> Result<Json<DrainReport>, ApiError> {
    Ok(Json(state.vault.drain_outbox().await?))
}

/// Probe the higher-capability store again, then drain.
///
/// This is the only way to leave the unavailable state without a restart.
#[utoipa::path(
    post,
    path = "/v1/outbox/retry",
    tag = "Outbox",
    responses(
        (status = 200, body = DrainReport),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn retry(State(state): State<AppState>) -> Result<Json<DrainReport>, ApiError> {
    state.vault.reprobe_capability().await?;
    Ok(Json(state.vault.drain_outbox().await?))
}
