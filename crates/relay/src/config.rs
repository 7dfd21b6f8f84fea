// Relay server configuration.
//
// Every setting comes from a `DRAWSYNC_RELAY_*` environment variable and has a
// default suitable for local development.

use std::{net::SocketAddr, path::PathBuf};

const DEFAULT_PORT: u16 = 8000;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `drawsync_relay=debug`).
    pub log_filter: String,
    /// File whose contents replace the placeholder diagram at startup.
    pub seed_document: Option<PathBuf>,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `DRAWSYNC_RELAY_HOST` | `0.0.0.0` |
    /// | `DRAWSYNC_RELAY_PORT` | `8000` |
    /// | `DRAWSYNC_RELAY_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `DRAWSYNC_RELAY_LOG_FILTER` | `info` |
    /// | `DRAWSYNC_RELAY_SEED_DOCUMENT` | *(none, built-in placeholder)* |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("DRAWSYNC_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("DRAWSYNC_RELAY_PORT")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let cors_origins = env("DRAWSYNC_RELAY_CORS_ORIGINS").ok();
        let log_filter = env("DRAWSYNC_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let seed_document = env("DRAWSYNC_RELAY_SEED_DOCUMENT")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        Self { listen_addr, cors_origins, log_filter, seed_document }
    }
}
