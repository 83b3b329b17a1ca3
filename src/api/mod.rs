// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    models::{
        ContentStatus, CreateRecordRequest, LoginRequest, LoginResponse, RecordResponse,
        SessionResponse,
    },
    router::{DrainReport, HealthReport, HitSource, SaveOutcome, SearchHit, StoreTarget},
    session::{ActivitySignal, SessionState},
    state::AppState,
    storage::RecordSource,
};

pub mod health;
pub mod outbox;
pub mod records;
pub mod search;
pub mod session;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/session", get(session::status))
        .route("/session/login", post(session::login))
        .route("/session/restore", post(session::restore))
        .route("/session/logout", post(session::logout))
        .route("/session/activity", post(session::activity))
        .route(
            "/records",
            get(records::list_records).post(records::create_record),
        )
        .route("/records/{record_id}", delete(records::delete_record))
        .route("/search", get(search::search))
        .route("/outbox/drain", post(outbox::drain))
        .route("/outbox/retry", post(outbox::retry))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .with_state(state)
        .nest("/v1", v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        session::status,
        session::login,
        session::restore,
        session::logout,
        session::activity,
        records::create_record,
        records::list_records,
        records::delete_record,
        search::search,
        outbox::drain,
        outbox::retry
    ),
    components(
        schemas(
            LoginRequest,
            LoginResponse,
            SessionResponse,
            SessionState,
            ActivitySignal,
            CreateRecordRequest,
            RecordResponse,
            ContentStatus,
            RecordSource,
            SaveOutcome,
            StoreTarget,
            SearchHit,
            HitSource,
            DrainReport,
            HealthReport,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Health", description = "Liveness and store availability"),
        (name = "Session", description = "PIN login, restore, logout and activity"),
        (name = "Records", description = "Encrypted record storage"),
        (name = "Search", description = "Search across both stores"),
        (name = "Outbox", description = "Replay of queued higher-capability writes")
    )
)]
struct ApiDoc;
