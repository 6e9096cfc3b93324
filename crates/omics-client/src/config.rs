//! Client configuration.
//!
//! Defaults come from the environment and fall back to constants:
//! - `OMICS_API_URL` base URL of the analysis service
//! - `OMICS_API_TOKEN` bearer token attached to every request
//! - `OMICS_REQUEST_TIMEOUT_SECS` per-request timeout
//! - `OMICS_POLL_INTERVAL_MS` delay between status queries
//! - `OMICS_POLL_MAX_ATTEMPTS` status queries before giving up

use std::str::FromStr;
use std::time::Duration;

/// Client version from Cargo.toml
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn user_agent() -> String {
    format!("omics-client/{}", CLIENT_VERSION)
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Retry discipline shared by the status poller and the result resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: env_parse::<u64>("OMICS_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            max_attempts: env_parse::<u32>("OMICS_POLL_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Attempts actually allowed. A zero budget still issues one query.
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Global per-request wait budget.
    pub fn budget(&self) -> Duration {
        self.interval * self.effective_max_attempts()
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub auth_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("OMICS_API_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            request_timeout: env_parse::<u64>("OMICS_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            auth_token: std::env::var("OMICS_API_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }
}

impl GatewayConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}
