//! Sync layer configuration from environment variables.
//!
//! Read once at process start; the resulting [`SyncConfig`] is immutable.

use std::str::FromStr;

use crewnexus_shared::{http_to_ws, join_url};

use crate::ws::ReconnectPolicy;

const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    api_base_url: String,
    ws_base_url: String,
    reconnect: ReconnectPolicy,
    login_path: String,
}

impl SyncConfig {
    /// Build from explicit base addresses with the default reconnect policy.
    pub fn new(api_base_url: impl Into<String>, ws_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            ws_base_url: ws_base_url.into().trim_end_matches('/').to_string(),
            reconnect: ReconnectPolicy::default(),
            login_path: "/login".to_string(),
        }
    }

    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CREWNEXUS_API_URL`: pull base address (default: "http://localhost:8000")
    /// - `CREWNEXUS_WS_URL`: push base address (default: the API URL as ws(s) plus "/ws")
    /// - `CREWNEXUS_WS_RECONNECT`: "true" | "false" (default: "true")
    /// - `CREWNEXUS_WS_RECONNECT_INTERVAL_MS`: fixed reconnect delay (default: 3000)
    /// - `CREWNEXUS_WS_MAX_ATTEMPTS`: reconnect attempts before giving up (default: 5)
    /// - `CREWNEXUS_LOGIN_PATH`: navigation target on 401 (default: "/login")
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_base_url = lookup("CREWNEXUS_API_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let ws_base_url = lookup("CREWNEXUS_WS_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| join_url(&http_to_ws(&api_base_url), "/ws"));

        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            reconnect: parse_or(&lookup, "CREWNEXUS_WS_RECONNECT", defaults.reconnect),
            interval_ms: parse_or(&lookup, "CREWNEXUS_WS_RECONNECT_INTERVAL_MS", defaults.interval_ms),
            max_attempts: parse_or(&lookup, "CREWNEXUS_WS_MAX_ATTEMPTS", defaults.max_attempts),
        };

        let mut config = Self::new(api_base_url, ws_base_url).with_reconnect(reconnect);
        if let Some(path) = lookup("CREWNEXUS_LOGIN_PATH").filter(|v| !v.trim().is_empty()) {
            config.login_path = path;
        }
        config
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn ws_base_url(&self) -> &str {
        &self.ws_base_url
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.reconnect.clone()
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Full push address for a topic path.
    pub fn ws_url(&self, topic: &str) -> String {
        join_url(&self.ws_base_url, topic)
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    match lookup(name) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring unparsable {}={:?}", name, raw);
                default
            }
        },
        None => default,
    }
}
