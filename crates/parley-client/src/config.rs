//! Connection settings for the chat server.

use std::time::Duration;

use serde::Deserialize;

/// Where and how to reach the chat server.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the REST API (e.g., "https://shop.example.com").
    #[serde(default = "ClientConfig::default_base_url")]
    pub base_url: String,

    /// URL of the WebSocket push endpoint.
    #[serde(default = "ClientConfig::default_push_url")]
    pub push_url: String,

    /// Bearer token sent with every request, if any.
    #[serde(default)]
    pub token: Option<String>,

    /// Request timeout in milliseconds.
    #[serde(default = "ClientConfig::default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Connect timeout in milliseconds.
    #[serde(default = "ClientConfig::default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl ClientConfig {
    fn default_base_url() -> String {
        "http://localhost:8080".to_string()
    }

    fn default_push_url() -> String {
        "ws://localhost:8080/ws".to_string()
    }

    const fn default_request_timeout() -> u64 {
        30_000
    }

    const fn default_connect_timeout() -> u64 {
        5_000
    }

    /// Create a config for a server, deriving the push URL from the base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let push_url = derive_push_url(&base_url);
        Self {
            base_url,
            push_url,
            ..Self::default()
        }
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the connect timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            push_url: Self::default_push_url(),
            token: None,
            request_timeout_ms: Self::default_request_timeout(),
            connect_timeout_ms: Self::default_connect_timeout(),
        }
    }
}

/// `http(s)://host/...` becomes `ws(s)://host/.../ws`.
fn derive_push_url(base_url: &str) -> String {
    let ws = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    };
    format!("{ws}/ws")
}
