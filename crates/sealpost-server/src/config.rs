//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use sealpost_shared::constants::DEFAULT_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address to accept clients on.
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:5555`
    pub listen_addr: SocketAddr,

    /// Root of the user registry, key files and conversation logs.
    /// Env: `DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// Maximum number of concurrent connections (0 = unlimited).
    /// Env: `MAX_CONNECTIONS`
    /// Default: `0`
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            data_dir: PathBuf::from("./data"),
            max_connections: 0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.listen_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid LISTEN_ADDR, using default"
                );
            }
        }

        if let Some(path) = lookup("DATA_DIR") {
            if !path.is_empty() {
                config.data_dir = PathBuf::from(path);
            }
        }

        if let Some(val) = lookup("MAX_CONNECTIONS") {
            match val.parse::<usize>() {
                Ok(n) => config.max_connections = n,
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid MAX_CONNECTIONS, using default");
                }
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, ([0, 0, 0, 0], 5555).into());
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.max_connections, 0);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("LISTEN_ADDR", "127.0.0.1:7000"),
            ("DATA_DIR", "/var/lib/sealpost"),
            ("MAX_CONNECTIONS", "64"),
        ]);
        assert_eq!(config.listen_addr, ([127, 0, 0, 1], 7000).into());
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/sealpost"));
        assert_eq!(config.max_connections, 64);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[("LISTEN_ADDR", "localhost"), ("MAX_CONNECTIONS", "lots")]);
        assert_eq!(config.listen_addr, ServerConfig::default().listen_addr);
        assert_eq!(config.max_connections, 0);
    }
}
