//! Client configuration loaded from the environment.

use std::env;
use std::time::Duration;

const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";
const DEFAULT_API_BASE: &str = "http://localhost:8000";

/// Configuration for a [`SyncClient`](crate::SyncClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Realtime connection endpoint.
    pub ws_url: String,
    /// Base URL of the pull endpoint.
    pub api_base: String,
    /// How often the poll fallback checks for missed events while the
    /// connection is down.
    pub poll_interval: Duration,
    /// Page limit passed to the events endpoint.
    pub pull_limit: u32,
}

impl ClientConfig {
    /// Load configuration from environment variables, with defaults matching
    /// a local development server.
    ///
    /// `PARLOR_WS_URL` accepts `http(s)` URLs and rewrites them to `ws(s)`,
    /// so the same value can be shared with the pull base.
    pub fn from_env() -> Self {
        let ws_url = env::var("PARLOR_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
        let api_base = env::var("PARLOR_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Self {
            ws_url: normalize_ws_url(&ws_url),
            api_base: trim_base(&api_base),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            poll_interval: Duration::from_secs(15),
            pull_limit: 200,
        }
    }
}

fn normalize_ws_url(raw: &str) -> String {
    match raw.strip_prefix("http") {
        Some(rest) => format!("ws{rest}"),
        None => raw.to_string(),
    }
}

fn trim_base(raw: &str) -> String {
    raw.trim_end_matches('/').to_string()
}
