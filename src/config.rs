// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the typed config built from
//! them at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for device and namespace databases | `./data` |
//! | `HOST` | Server bind address | `127.0.0.1` |
//! | `PORT` | Server bind port | `8787` |
//! | `IDLE_TIMEOUT_SECS` | Inactivity before the session locks | `300` |
//! | `DRAIN_INTERVAL_SECS` | Period of the background outbox drain (at least 1) | `30` |
//! | `KDF_ITERATIONS` | PBKDF2 iterations (never below 100 000) | `100000` |
//! | `CAPABILITY_STORE` | `enabled` or `disabled` | `enabled` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::crypto::kdf::MIN_KDF_ITERATIONS;
use crate::router::routing::RoutingTable;
use crate::router::scheduler::MIN_DRAIN_INTERVAL;
use crate::storage::{OutboxPolicy, StoragePaths};

/// Environment variable name for the data directory.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// Seconds of inactivity before an authenticated session is locked.
pub const IDLE_TIMEOUT_ENV: &str = "IDLE_TIMEOUT_SECS";

/// Seconds between background outbox drains.
pub const DRAIN_INTERVAL_ENV: &str = "DRAIN_INTERVAL_SECS";

pub const KDF_ITERATIONS_ENV: &str = "KDF_ITERATIONS";

/// Set to `disabled` to run with the local store only.
pub const CAPABILITY_STORE_ENV: &str = "CAPABILITY_STORE";

/// `json` for structured logs, anything else for human-readable output.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(30);

/// Storage and session settings for a vault host.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub paths: StoragePaths,
    pub idle_timeout: Duration,
    pub drain_interval: Duration,
    pub kdf_iterations: u32,
    /// Whether to attempt the higher-capability store at all.
    pub capability_store: bool,
    /// Spawn a periodic drain per open router.
    pub background_drain: bool,
    pub outbox_policy: OutboxPolicy,
    pub routing: RoutingTable,
}

impl VaultConfig {
    pub fn for_data_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            paths: StoragePaths::new(dir),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            kdf_iterations: MIN_KDF_ITERATIONS,
            capability_store: true,
            background_drain: true,
            outbox_policy: OutboxPolicy::default(),
            routing: RoutingTable::default(),
        }
    }

    pub fn from_env() -> Self {
        let mut config = match std::env::var(DATA_DIR_ENV) {
            Ok(dir) => Self::for_data_dir(dir),
            Err(_) => Self::for_data_dir(crate::storage::paths::DATA_ROOT),
        };
        config.idle_timeout = Duration::from_secs(env_or(
            IDLE_TIMEOUT_ENV,
            DEFAULT_IDLE_TIMEOUT.as_secs(),
        ));
        config.drain_interval = drain_interval(env_or(
            DRAIN_INTERVAL_ENV,
            DEFAULT_DRAIN_INTERVAL.as_secs(),
        ));
        config.kdf_iterations = env_or(KDF_ITERATIONS_ENV, MIN_KDF_ITERATIONS);
        config.capability_store = std::env::var(CAPABILITY_STORE_ENV)
            .map(|v| !v.eq_ignore_ascii_case("disabled"))
            .unwrap_or(true);
        config
    }
}

/// Drain period in seconds, clamped to [`MIN_DRAIN_INTERVAL`].
fn drain_interval(secs: u64) -> Duration {
    Duration::from_secs(secs).max(MIN_DRAIN_INTERVAL)
}

/// Bind address for the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var(HOST_ENV).unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: env_or(PORT_ENV, DEFAULT_PORT),
        }
    }

    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Parse `name` from the environment, falling back to `default` when unset or
/// malformed.
fn env_or<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, %default, "Ignoring malformed setting");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_defaults() {
        let config = VaultConfig::for_data_dir("/tmp/pv");
        assert_eq!(config.paths.root(), Path::new("/tmp/pv"));
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.drain_interval, Duration::from_secs(30));
        assert_eq!(config.kdf_iterations, 100_000);
        assert!(config.capability_store);
        assert!(config.background_drain);
    }

    #[test]
    fn zero_drain_interval_is_clamped() {
        assert_eq!(drain_interval(0), MIN_DRAIN_INTERVAL);
        assert_eq!(drain_interval(45), Duration::from_secs(45));
    }

    #[test]
    fn unset_variable_uses_default() {
        assert_eq!(env_or("PINVAULT_TEST_SURELY_UNSET", 42u64), 42);
    }

    #[test]
    fn server_addr_parses() {
        let server = ServerConfig {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
        };
        assert_eq!(server.addr().unwrap().port(), 8787);
    }
}
