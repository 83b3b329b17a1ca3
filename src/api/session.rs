// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};

use crate::{
    error::ApiError,
    models::{LoginRequest, LoginResponse, SessionResponse},
    session::ActivitySignal,
    state::AppState,
    vault::Vault,
};

fn session_response(vault: &Vault) -> SessionResponse {
    let session = vault.session();
    SessionResponse {
        state: session.state(),
        masked_hint: session.masked_hint(),
        active: session.has_active_session(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/session/login",
    request_body = LoginRequest,
    tag = "Session",
    responses(
        (status = 200, body = LoginResponse),
        (status = 400, description = "Empty secret")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if request.secret.trim().is_empty() {
        return Err(ApiError::bad_request("secret must not be empty"));
    }
    let namespace = state.vault.login(&request.secret, request.remember).await?;
    Ok(Json(LoginResponse {
        namespace: namespace.to_string(),
        session: session_response(&state.vault),
    }))
}

/// Resume a remembered or still-running session without the secret.
#[utoipa::path(
    post,
    path = "/v1/session/restore",
    tag = "Session",
    responses((status = 200, body = SessionResponse))
)]
pub async fn restore(State(state): State<AppState>) -> Result<Json<SessionResponse>, ApiError> {
    state.vault.restore().await?;
    Ok(Json(session_response(&state.vault)))
}

#[utoipa::path(
    post,
    path = "/v1/session/logout",
    tag = "Session",
    responses((status = 204))
)]
pub async fn logout(State(state): State<AppState>) -> StatusCode {
    state.vault.logout();
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/v1/session/activity",
    request_body = ActivitySignal,
    tag = "Session",
    responses((status = 204))
)]
pub async fn activity(
    State(state): State<AppState>,
    Json(signal): Json<ActivitySignal>,
) -> StatusCode {
    state.vault.record_activity(signal);
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    get,
    path = "/v1/session",
    tag = "Session",
    responses((status = 200, body = SessionResponse))
)]
pub async fn status(State(state): State<AppState>) -> Json<SessionResponse> {
    Json(session_response(&state.vault))
}
