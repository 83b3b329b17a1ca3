// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use pinvault::{
    api::router,
    config::{ServerConfig, VaultConfig, LOG_FORMAT_ENV},
    session::DeviceFingerprint,
    state::AppState,
    vault::VaultHost,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = VaultConfig::from_env();
    let connector = VaultHost::connector_for(&config);
    let host = VaultHost::open(config, connector, DeviceFingerprint::from_environment())
        .expect("Failed to open vault storage");

    let vault = host.open_surface();
    match vault.restore().await {
        Ok(session) => info!(?session, "Session restored"),
        Err(e) => warn!(error = %e, "Session restore failed, starting logged out"),
    }

    let state = AppState::new(vault);
    let app = router(state);

    let addr = ServerConfig::from_env()
        .addr()
        .expect("Failed to parse bind address");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");

    info!(%addr, "PinVault listening (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("HTTP server failed");

    host.close();
}
