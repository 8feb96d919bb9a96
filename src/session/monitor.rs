//! Readiness monitor — poll-then-stream backend status tracking.
//!
//! DESIGN
//! ======
//! One plain-text status fetch decides the path:
//! - `Ready` → done immediately
//! - `Loading` / `Starting` → open the push stream and wait for Ready
//! - anything else → terminal failure
//!
//! The push stream is newline-delimited `data: <json>` frames. Bytes are
//! buffered across chunk boundaries so a frame split over two reads is
//! still decoded once. Decoding stops at the first Ready or terminal event;
//! anything after it on the stream is never parsed.
//!
//! The whole check runs in one spawned task that owns the HTTP response.
//! `cancel` aborts that task, which drops the response and closes its
//! connection. The outcome is published once through a `watch` channel
//! that only ever moves out of `Pending`.
//!
//! ERROR HANDLING
//! ==============
//! A frame whose payload is not valid JSON is logged and skipped. A line
//! without the `data:` prefix is a protocol violation and ends the watch.
//! A terminal state on the stream fails with `BackendTerminal`. A stream
//! that closes before Ready fails with `StreamEnded` instead of leaving
//! waiters pending forever.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ConnectionCoordinates;

const DATA_PREFIX: &str = "data:";

// =============================================================================
// TYPES
// =============================================================================

/// Backend lifecycle as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum BackendStatus {
    Loading,
    Starting,
    Ready,
    Terminal(String),
}

impl From<String> for BackendStatus {
    fn from(state: String) -> Self {
        match state.as_str() {
            "Loading" => Self::Loading,
            "Starting" => Self::Starting,
            "Ready" => Self::Ready,
            _ => Self::Terminal(state),
        }
    }
}

impl BackendStatus {
    /// Classify a plain-text status body by substring.
    #[must_use]
    pub fn from_status_body(body: &str) -> Self {
        if body.contains("Ready") {
            Self::Ready
        } else if body.contains("Loading") {
            Self::Loading
        } else if body.contains("Starting") {
            Self::Starting
        } else {
            Self::Terminal(body.trim().to_string())
        }
    }

    /// Loading and Starting; Ready and terminal states never change again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Loading | Self::Starting)
    }
}

/// One unit of the status stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusEvent {
    pub state: BackendStatus,
    #[serde(default)]
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    #[error("status fetch failed: HTTP {status}: {body}")]
    StatusFetch { status: u16, body: String },
    #[error("status request failed: {0}")]
    Request(String),
    #[error("backend reported terminal status: {0}")]
    BackendTerminal(String),
    #[error("malformed status frame {payload:?}: {reason}")]
    MalformedStreamFrame { payload: String, reason: String },
    #[error("unexpected line on status stream: {0:?}")]
    UnrecognizedFrameFormat(String),
    #[error("status stream closed before backend became ready")]
    StreamEnded,
    #[error("backend not ready after {0:?}")]
    Timeout(Duration),
    #[error("readiness monitor cancelled")]
    Cancelled,
}

/// Published monitor state. Leaves `Pending` at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorState {
    Pending,
    Ready,
    Failed(MonitorError),
}

// =============================================================================
// STREAM DECODER
// =============================================================================

/// One decoded stream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Event(StatusEvent),
    /// Non-fatal: payload was not a `StatusEvent`.
    Malformed(MonitorError),
}

impl StreamItem {
    /// Whether this item ends the watch.
    #[must_use]
    pub fn settles(&self) -> bool {
        matches!(self, Self::Event(event) if !event.state.is_transient())
    }
}

/// Incremental decoder for `data:`-prefixed, newline-delimited frames.
#[derive(Debug, Default)]
pub struct StatusStreamDecoder {
    pending: Vec<u8>,
}

impl StatusStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and decode the complete lines it finishes, up to and
    /// including the first settling (Ready or terminal) event. Lines after
    /// that event stay buffered and unparsed.
    ///
    /// # Errors
    ///
    /// Returns `UnrecognizedFrameFormat` on the first non-blank line that
    /// lacks the `data:` prefix, unless a settling event came before it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamItem>, MonitorError> {
        self.pending.extend_from_slice(chunk);
        let mut items = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let Some(item) = decode_line(&String::from_utf8_lossy(&line))? else {
                continue;
            };
            let settles = item.settles();
            items.push(item);
            if settles {
                break;
            }
        }
        Ok(items)
    }

    /// Decode whatever is left once the stream has ended.
    ///
    /// # Errors
    ///
    /// Same as `push`.
    pub fn finish(&mut self) -> Result<Vec<StreamItem>, MonitorError> {
        let rest = std::mem::take(&mut self.pending);
        Ok(decode_line(&String::from_utf8_lossy(&rest))?
            .into_iter()
            .collect())
    }
}

fn decode_line(raw: &str) -> Result<Option<StreamItem>, MonitorError> {
    let line = raw.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Err(MonitorError::UnrecognizedFrameFormat(line.to_string()));
    };
    let payload = payload.trim();
    Ok(Some(match serde_json::from_str::<StatusEvent>(payload) {
        Ok(event) => StreamItem::Event(event),
        Err(e) => {
            StreamItem::Malformed(MonitorError::MalformedStreamFrame { payload: payload.to_string(), reason: e.to_string() })
        }
    }))
}

// =============================================================================
// MONITOR
// =============================================================================

/// Handle on a running readiness check.
pub struct ReadinessMonitor {
    state: watch::Receiver<MonitorState>,
    task: Option<JoinHandle<()>>,
}

impl ReadinessMonitor {
    /// Start watching the backend behind `coordinates`. Must be called from
    /// within a Tokio runtime.
    #[must_use]
    pub fn start(
        http: reqwest::Client,
        coordinates: &ConnectionCoordinates,
        stream_suffix: &str,
        ready_timeout: Option<Duration>,
    ) -> Self {
        let (tx, rx) = watch::channel(MonitorState::Pending);
        let status_url = coordinates.status_url.clone();
        let stream_url = format!("{status_url}{stream_suffix}");

        let task = tokio::spawn(async move {
            let check = watch_status(&http, &status_url, &stream_url);
            let outcome = match ready_timeout {
                Some(limit) => tokio::time::timeout(limit, check)
                    .await
                    .unwrap_or(Err(MonitorError::Timeout(limit))),
                None => check.await,
            };
            let next = match outcome {
                Ok(()) => MonitorState::Ready,
                Err(e) => MonitorState::Failed(e),
            };
            tx.send_if_modified(|state| {
                if *state != MonitorState::Pending {
                    return false;
                }
                *state = next;
                true
            });
        });

        Self { state: rx, task: Some(task) }
    }

    /// Current state without waiting.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        self.state.borrow().clone()
    }

    /// A receiver for callers that wait on the outcome from another task.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state.clone()
    }

    /// Wait until the backend is ready.
    ///
    /// # Errors
    ///
    /// Returns the failure that ended the check, or `Cancelled`.
    pub async fn wait(&self) -> Result<(), MonitorError> {
        wait_ready(self.subscribe()).await
    }

    /// Stop the check and release the status stream. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("readiness monitor cancelled");
        }
    }
}

impl Drop for ReadinessMonitor {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Resolve once `rx` leaves `Pending`.
///
/// # Errors
///
/// Returns the failure that ended the check, or `Cancelled` if the monitor
/// went away first.
pub async fn wait_ready(mut rx: watch::Receiver<MonitorState>) -> Result<(), MonitorError> {
    let state = rx
        .wait_for(|s| *s != MonitorState::Pending)
        .await
        .map_err(|_| MonitorError::Cancelled)?
        .clone();
    match state {
        MonitorState::Ready => Ok(()),
        MonitorState::Failed(e) => Err(e),
        MonitorState::Pending => Err(MonitorError::Cancelled),
    }
}

// =============================================================================
// STATUS PROTOCOL
// =============================================================================

async fn watch_status(http: &reqwest::Client, status_url: &str, stream_url: &str) -> Result<(), MonitorError> {
    let response = http
        .get(status_url)
        .send()
        .await
        .map_err(|e| MonitorError::Request(e.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| MonitorError::Request(e.to_string()))?;
    if !status.is_success() {
        return Err(MonitorError::StatusFetch { status: status.as_u16(), body });
    }

    match BackendStatus::from_status_body(&body) {
        BackendStatus::Ready => {
            info!(status_url, "backend already ready");
            return Ok(());
        }
        BackendStatus::Terminal(reason) => return Err(MonitorError::BackendTerminal(reason)),
        BackendStatus::Loading | BackendStatus::Starting => {}
    }

    info!(stream_url, "backend starting; streaming status");
    let mut response = http
        .get(stream_url)
        .send()
        .await
        .map_err(|e| MonitorError::Request(e.to_string()))?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(MonitorError::StatusFetch { status, body });
    }

    let mut decoder = StatusStreamDecoder::new();
    loop {
        let chunk = response
            .chunk()
            .await
            .map_err(|e| MonitorError::Request(e.to_string()))?;
        let Some(chunk) = chunk else { break };
        if let Some(outcome) = settle(decoder.push(&chunk)?) {
            // Returning drops `response`, which closes the stream.
            return outcome;
        }
    }

    if let Some(outcome) = settle(decoder.finish()?) {
        return outcome;
    }
    info!("status stream closed by server");
    Err(MonitorError::StreamEnded)
}

/// Log each item and return the outcome of the first settling event.
fn settle(items: Vec<StreamItem>) -> Option<Result<(), MonitorError>> {
    for item in items {
        match item {
            StreamItem::Event(event) => {
                debug!(state = ?event.state, time = %event.time, "backend status");
                match event.state {
                    BackendStatus::Ready => return Some(Ok(())),
                    BackendStatus::Terminal(reason) => return Some(Err(MonitorError::BackendTerminal(reason))),
                    BackendStatus::Loading | BackendStatus::Starting => {}
                }
            }
            StreamItem::Malformed(e) => warn!(error = %e, "skipping malformed status frame"),
        }
    }
    None
}

#[cfg(test)]
#[path = "monitor_test.rs"]
mod tests;
