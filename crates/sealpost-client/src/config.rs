//! Client configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use sealpost_shared::constants::{DEFAULT_PORT, DEFAULT_RESPONSE_TIMEOUT_MS};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server to connect to.
    /// Env: `SERVER_ADDR`
    /// Default: `127.0.0.1:5555`
    pub server_addr: String,

    /// Directory holding `keys/<username>/private.pem`.
    /// Env: `DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// How long an action waits for its response.
    /// Env: `RESPONSE_TIMEOUT_MS`
    /// Default: 500 ms
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            data_dir: PathBuf::from("./data"),
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("SERVER_ADDR") {
            if addr.is_empty() {
                tracing::warn!("Empty SERVER_ADDR, using default");
            } else {
                config.server_addr = addr;
            }
        }

        if let Some(path) = lookup("DATA_DIR") {
            if !path.is_empty() {
                config.data_dir = PathBuf::from(path);
            }
        }

        if let Some(val) = lookup("RESPONSE_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.response_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid RESPONSE_TIMEOUT_MS, using default"),
            }
        }

        config
    }
}
