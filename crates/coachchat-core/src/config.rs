//! Chat client configuration.

use std::time::Duration;

use crate::reconnect::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY, ReconnectPolicy,
};

/// Credential store key holding the bearer token.
pub const TOKEN_KEY: &str = "auth_token";

/// Broker endpoint and reconnection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// WebSocket scheme (`ws` or `wss`).
    pub scheme: String,
    /// Broker host, optionally with port.
    pub host: String,
    /// Mount path of the broker endpoint.
    pub path: String,
    /// Automatic reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub reconnect_base_delay: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            scheme: "wss".to_string(),
            host: "localhost:3000".to_string(),
            path: "/cable".to_string(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
        }
    }
}

impl ChatConfig {
    /// Configuration for `host` with default scheme, path and backoff.
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), ..Self::default() }
    }

    /// Override the WebSocket scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Override the reconnect attempt limit.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Override the base reconnect delay.
    #[must_use]
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Broker URL carrying the URL-encoded bearer token.
    pub fn broker_url(&self, token: &str) -> String {
        format!(
            "{}://{}{}?token={}",
            self.scheme,
            self.host.trim_end_matches('/'),
            self.path,
            urlencoding::encode(token)
        )
    }

    /// Fresh backoff policy for these settings.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.max_reconnect_attempts, self.reconnect_base_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_url_encodes_token() {
        let config = ChatConfig::new("api.coach.example");
        insta::assert_snapshot!(
            config.broker_url("a+b/c=="),
            @"wss://api.coach.example/cable?token=a%2Bb%2Fc%3D%3D"
        );
    }

    #[test]
    fn broker_url_respects_scheme_and_trailing_slash() {
        let config = ChatConfig::new("localhost:3000/").with_scheme("ws");
        assert_eq!(config.broker_url("t"), "ws://localhost:3000/cable?token=t");
    }

    #[test]
    fn policy_follows_config() {
        let config = ChatConfig::default()
            .with_max_reconnect_attempts(2)
            .with_reconnect_base_delay(Duration::from_millis(50));
        let policy = config.reconnect_policy();

        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
    }
}
