// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::path::Path;
use utoipa::ToSchema;

use crate::router::HealthReport;
use crate::state::AppState;

/// Health check response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    /// Individual health checks and their results.
    pub checks: HealthChecks,
    /// Store counts and outbox backlog. Only present while a user is logged in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault: Option<HealthReport>,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Data directory availability.
    pub data_dir: String,
    /// Local encrypted store of the logged-in namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_store: Option<String>,
    /// Higher-capability store. "unavailable" is not a failure: writes queue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_store: Option<String>,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

fn check_data_dir(dir: &Path) -> String {
    let status = if dir.is_dir() { "ok" } else { "missing" };
    status.to_string()
}

fn availability(ok: bool) -> String {
    let status = if ok { "ok" } else { "unavailable" };
    status.to_string()
}

/// Health check endpoint handler.
///
/// Returns 200 unless the data directory or the local store is unusable.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let data_dir = check_data_dir(state.vault.host().config().paths.root());

    // Only a session with its secret can open the namespace's stores
    let report = if state.vault.session().secret_for_crypto_ops().is_some() {
        state.vault.health().await.ok()
    } else {
        None
    };

    let data_ok = data_dir == "ok";
    let local_ok = report.as_ref().map(|r| r.local).unwrap_or(true);
    let capability_ok = report.as_ref().map(|r| r.capability).unwrap_or(true);
    let all_ok = data_ok && local_ok;

    let response = ReadyResponse {
        status: if all_ok && capability_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            data_dir,
            local_store: report.as_ref().map(|r| availability(r.local)),
            capability_store: report.as_ref().map(|r| availability(r.capability)),
        },
        vault: report,
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
