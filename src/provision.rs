//! Provisioning API client.
//!
//! Thin HTTP wrapper for `POST {api}/user/{account}/service/{service}/spawn`.
//! Spawning with a lock name returns the already-running backend for that
//! lock, so every caller naming the same whiteboard lands on one instance.
//! Response parsing lives in `parse_response` for testability.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{DEFAULT_CONNECT_TIMEOUT_SECS, ProvisionConfig};
use crate::session::ConnectionCoordinates;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to build http client: {0}")]
    HttpClientBuild(String),
    #[error("spawn request failed: {0}")]
    Request(String),
    #[error("spawn failed: HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected spawn response: {0}")]
    Parse(String),
}

// =============================================================================
// TYPES
// =============================================================================

/// Everything needed to ask for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub account: String,
    pub service: String,
    pub token: String,
    pub lock: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
}

impl SpawnRequest {
    #[must_use]
    pub fn from_config(config: &ProvisionConfig) -> Self {
        Self {
            account: config.account.clone(),
            service: config.service.clone(),
            token: config.token.clone(),
            lock: config.lock.clone(),
            env: None,
        }
    }
}

/// A provisioned backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnResult {
    pub url: String,
    pub name: String,
    pub ready_url: String,
    pub status_url: String,
    /// `false` when the lock resolved to an existing backend.
    pub spawned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl SpawnResult {
    #[must_use]
    pub fn coordinates(&self) -> ConnectionCoordinates {
        ConnectionCoordinates { realtime_url: self.url.clone(), status_url: self.status_url.clone() }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct ProvisionClient {
    http: reqwest::Client,
    api_url: String,
}

impl ProvisionClient {
    /// # Errors
    ///
    /// Returns `HttpClientBuild` if the HTTP client cannot be built.
    pub fn new(api_url: &str, request_timeout: Duration) -> Result<Self, ProvisionError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProvisionError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, api_url: api_url.trim_end_matches('/').to_string() })
    }

    /// # Errors
    ///
    /// Returns `HttpClientBuild` if the HTTP client cannot be built.
    pub fn from_config(config: &ProvisionConfig) -> Result<Self, ProvisionError> {
        Self::new(&config.api_url, config.request_timeout)
    }

    /// Spawn (or look up, when locked) a backend.
    ///
    /// # Errors
    ///
    /// Returns `Api` with the response body on any non-2xx status.
    pub async fn spawn(&self, request: &SpawnRequest) -> Result<SpawnResult, ProvisionError> {
        let url = format!("{}/user/{}/service/{}/spawn", self.api_url, request.account, request.service);
        let body = ApiRequest { lock: request.lock.as_deref(), env: request.env.as_ref() };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&request.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProvisionError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProvisionError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(ProvisionError::Api { status: status.as_u16(), body: text });
        }

        let result = parse_response(&text)?;
        info!(name = %result.name, spawned = result.spawned, "backend provisioned");
        Ok(result)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct ApiRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    lock: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    env: Option<&'a BTreeMap<String, String>>,
}

fn parse_response(json: &str) -> Result<SpawnResult, ProvisionError> {
    serde_json::from_str(json).map_err(|e| ProvisionError::Parse(e.to_string()))
}

#[cfg(test)]
#[path = "provision_test.rs"]
mod tests;
