//! Session configuration

use coedit_common::ClientId;
use std::time::Duration;

/// Reconnection policy: exponential backoff, capped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectionConfig {
    pub enabled: bool,
    /// Attempts before giving up.
    pub attempts: u32,
    /// Initial backoff.
    pub delay: Duration,
    /// Backoff ceiling.
    pub delay_max: Duration,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 5,
            delay: Duration::from_secs(1),
            delay_max: Duration::from_secs(30),
        }
    }
}

impl ReconnectionConfig {
    /// Backoff before attempt number `attempt` (0-based):
    /// `min(delay * 2^attempt, delay_max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        exp.min(self.delay_max)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8080/ws`.
    pub server_url: String,
    pub token: Option<String>,
    /// Declared in `authenticate`; the coordinator mints one if absent.
    pub client_id: Option<ClientId>,
    pub connection_timeout: Duration,
    /// Deadline for the `auth_success`/`auth_failed` reply.
    pub auth_timeout: Duration,
    pub reconnection: ReconnectionConfig,
    /// Extra headers for the WebSocket handshake.
    pub headers: Vec<(String, String)>,
}

impl SessionConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: None,
            client_id: None,
            connection_timeout: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(10),
            reconnection: ReconnectionConfig::default(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnection(mut self, reconnection: ReconnectionConfig) -> Self {
        self.reconnection = reconnection;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = SessionConfig::new("ws://localhost:8080/ws");
        assert_eq!(config.connection_timeout, Duration::from_secs(30));
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
        assert!(config.reconnection.enabled);
        assert_eq!(config.reconnection.attempts, 5);
        assert_eq!(config.reconnection.delay, Duration::from_secs(1));
        assert_eq!(config.reconnection.delay_max, Duration::from_secs(30));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let reconnection = ReconnectionConfig::default();
        assert_eq!(reconnection.backoff(0), Duration::from_secs(1));
        assert_eq!(reconnection.backoff(1), Duration::from_secs(2));
        assert_eq!(reconnection.backoff(3), Duration::from_secs(8));
        assert_eq!(reconnection.backoff(10), Duration::from_secs(30));
        assert_eq!(reconnection.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn builder_accumulates() {
        let config = SessionConfig::new("ws://host/ws")
            .with_token("secret")
            .with_header("x-team", "core");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.headers.len(), 1);
    }
}
