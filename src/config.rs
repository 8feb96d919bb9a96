//! Typed configuration parsed from environment variables.
//!
//! Every config struct is built through `from_vars`, which takes a lookup
//! function, so `from_env` is a thin wrapper over `std::env::var` and tests
//! can feed a plain map without touching process state.

use std::time::Duration;

pub const DEFAULT_RELAY_PORT: u16 = 8080;
pub const DEFAULT_VOLATILE_CAPACITY: usize = 32;

pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STREAM_SUFFIX: &str = "/stream";

pub const DEFAULT_PROVISION_API_URL: &str = "https://api.jamsocket.com";
pub const DEFAULT_PROVISION_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
}

// =============================================================================
// RELAY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    pub port: u16,
    /// Per-participant bound on queued cursor frames before new ones are dropped.
    pub volatile_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { port: DEFAULT_RELAY_PORT, volatile_capacity: DEFAULT_VOLATILE_CAPACITY }
    }
}

impl RelayConfig {
    /// Optional:
    /// - `PORT`: default 8080
    /// - `RELAY_VOLATILE_CAPACITY`: default 32, clamped to at least 1
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: parse_or(&lookup, "PORT", DEFAULT_RELAY_PORT),
            volatile_capacity: parse_or(&lookup, "RELAY_VOLATILE_CAPACITY", DEFAULT_VOLATILE_CAPACITY).max(1),
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on the whole readiness phase. `None` waits indefinitely.
    pub ready_timeout: Option<Duration>,
    /// Connect timeout for status requests and the realtime handshake.
    pub connect_timeout: Duration,
    /// Appended to the status URL to reach the push stream.
    pub stream_suffix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Some(Duration::from_secs(DEFAULT_READY_TIMEOUT_SECS)),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            stream_suffix: DEFAULT_STREAM_SUFFIX.to_string(),
        }
    }
}

impl SessionConfig {
    /// Optional:
    /// - `SESSION_READY_TIMEOUT_SECS`: default 300, `0` disables the timeout
    /// - `SESSION_CONNECT_TIMEOUT_SECS`: default 10
    /// - `SESSION_STREAM_SUFFIX`: default `/stream`
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let ready_secs = parse_or(&lookup, "SESSION_READY_TIMEOUT_SECS", DEFAULT_READY_TIMEOUT_SECS);
        let connect_secs = parse_or(&lookup, "SESSION_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS);
        let stream_suffix = lookup("SESSION_STREAM_SUFFIX")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_STREAM_SUFFIX.to_string());

        Self {
            ready_timeout: (ready_secs > 0).then(|| Duration::from_secs(ready_secs)),
            connect_timeout: Duration::from_secs(connect_secs),
            stream_suffix,
        }
    }
}

// =============================================================================
// PROVISIONING
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionConfig {
    pub api_url: String,
    pub account: String,
    pub service: String,
    pub token: String,
    pub lock: Option<String>,
    pub request_timeout: Duration,
}

impl ProvisionConfig {
    /// Required:
    /// - `PROVISION_ACCOUNT`, `PROVISION_SERVICE`, `PROVISION_TOKEN`
    ///
    /// Optional:
    /// - `PROVISION_API_URL`: default `https://api.jamsocket.com`
    /// - `PROVISION_LOCK`: lock name so every caller lands on one backend
    /// - `PROVISION_TIMEOUT_SECS`: default 30
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` naming the first absent required var.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env_lookup)
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Missing` naming the first absent required var.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let account = required("PROVISION_ACCOUNT")?;
        let service = required("PROVISION_SERVICE")?;
        let token = required("PROVISION_TOKEN")?;
        let api_url = lookup("PROVISION_API_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_PROVISION_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let lock = lookup("PROVISION_LOCK").filter(|v| !v.is_empty());
        let timeout_secs = parse_or(&lookup, "PROVISION_TIMEOUT_SECS", DEFAULT_PROVISION_TIMEOUT_SECS);

        Ok(Self { api_url, account, service, token, lock, request_timeout: Duration::from_secs(timeout_secs) })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
