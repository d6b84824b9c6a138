//! Coordinator configuration

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Require a valid token in `authenticate`.
    pub auth_required: bool,
    /// Shared secret for token verification when auth is on.
    pub auth_secret: Option<String>,
    /// Exact allowed origin; permissive when unset.
    pub cors_origin: Option<String>,
    /// Directory for the JSON file store; in-memory when unset.
    pub data_dir: Option<PathBuf>,
    /// Sessions idle longer than this are swept out.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// Trim the per-document operation ring above this length...
    pub history_high_water: usize,
    /// ...down to this many retained operations.
    pub history_keep: usize,
    /// Bounded per-client outbound queue; overflow disconnects the peer.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            auth_required: false,
            auth_secret: None,
            cors_origin: None,
            data_dir: None,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            history_high_water: 1000,
            history_keep: 500,
            outbound_queue: 256,
        }
    }
}

impl ServerConfig {
    /// Environment overrides: `PORT`, `HOST`, `AUTH_REQUIRED`, `AUTH_SECRET`,
    /// `CORS_ORIGIN`, `DATA_DIR`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(port) = std::env::var("PORT").ok().and_then(|s| s.parse().ok()) {
            config.port = port;
        }
        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }
        if let Ok(required) = std::env::var("AUTH_REQUIRED") {
            config.auth_required = matches!(required.as_str(), "1" | "true" | "yes");
        }
        if let Ok(secret) = std::env::var("AUTH_SECRET") {
            if !secret.is_empty() {
                config.auth_secret = Some(secret);
            }
        }
        if let Ok(origin) = std::env::var("CORS_ORIGIN") {
            if !origin.is_empty() {
                config.cors_origin = Some(origin);
            }
        }
        if let Ok(dir) = std::env::var("DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }
        config
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert!(!config.auth_required);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.history_high_water, 1000);
        assert_eq!(config.history_keep, 500);
    }
}
