//! Transport session — client-side connection bootstrap.
//!
//! ARCHITECTURE
//! ============
//! A session owns three pieces:
//! - `ReadinessMonitor`: is the backend up?
//! - `CommandBuffer`: what did the caller ask for before it was?
//! - `WsLink`: the live realtime connection, once there is one
//!
//! LIFECYCLE
//! =========
//! 1. `connect` starts the monitor and a driver task
//! 2. Monitor reports Ready → driver opens the realtime link
//! 3. First `connected` frame → flush the buffer, publish Ready, run
//!    `on_ready` callbacks
//! 4. Every inbound frame → dispatch to attached listeners
//! 5. `destroy` (or drop) → cancel the monitor, stop the driver, close the
//!    link. A Pending session fails with `Destroyed`; a Ready one moves to
//!    `Readiness::Destroyed`
//!
//! The driver flushes before it reads the next frame, so listeners queued
//! before Ready are attached in time for the relay's opening snapshot.
//!
//! ERROR HANDLING
//! ==============
//! A monitor failure, a failed handshake or a link that closes before
//! `connected` all fail the session. A failed session never flushes; its
//! queued work is dropped with it.

pub mod buffer;
pub mod handlers;
pub mod link;
pub mod monitor;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::frame::{CONNECTED, Frame};
use buffer::{CommandBuffer, Transport};
use handlers::{EventHandler, HandlerRegistry};
use link::WsLink;
use monitor::{MonitorError, MonitorState, ReadinessMonitor};

// =============================================================================
// TYPES
// =============================================================================

/// Where one backend instance can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCoordinates {
    pub realtime_url: String,
    pub status_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("backend readiness failed: {0}")]
    Readiness(#[from] MonitorError),
    #[error("unsupported realtime url: {0}")]
    InvalidUrl(String),
    #[error("realtime connect failed: {0}")]
    Connect(String),
    #[error("realtime link closed")]
    Closed,
    #[error("failed to encode payload: {0}")]
    Serialize(String),
    #[error("failed to build http client: {0}")]
    HttpClientBuild(String),
    #[error("session destroyed")]
    Destroyed,
}

/// Observable session state. Leaves `Pending` at most once; the only later
/// move is `Ready` to `Destroyed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed(SessionError),
    /// Was Ready, then destroyed.
    Destroyed,
}

type ReadyCallback = Box<dyn FnOnce() + Send>;

enum Phase {
    Pending { callbacks: Vec<(u64, ReadyCallback)> },
    Ready,
    Failed,
    Destroyed,
}

// =============================================================================
// CORE
// =============================================================================

struct SessionCore {
    phase: Mutex<Phase>,
    readiness: watch::Sender<Readiness>,
    buffer: CommandBuffer,
    handlers: Arc<HandlerRegistry>,
    link: Mutex<Option<Arc<WsLink>>>,
    participant_id: Mutex<Option<String>>,
    next_callback: AtomicU64,
}

impl SessionCore {
    fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Pending { callbacks: Vec::new() }),
            readiness: watch::Sender::new(Readiness::Pending),
            buffer: CommandBuffer::new(),
            handlers: Arc::new(HandlerRegistry::new()),
            link: Mutex::new(None),
            participant_id: Mutex::new(None),
            next_callback: AtomicU64::new(0),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flush, publish Ready, then run queued callbacks. No-op unless Pending.
    fn mark_ready(&self, link: Arc<WsLink>, participant_id: Option<String>) -> bool {
        let callbacks = {
            let mut phase = self.phase();
            let Phase::Pending { callbacks } = &mut *phase else {
                return false;
            };
            let callbacks = std::mem::take(callbacks);
            self.buffer.flush(link.clone());
            *lock(&self.link) = Some(link);
            *lock(&self.participant_id) = participant_id;
            *phase = Phase::Ready;
            callbacks
        };

        self.readiness.send_replace(Readiness::Ready);
        for (_, callback) in callbacks {
            callback();
        }
        true
    }

    /// Record a fatal failure and drop queued callbacks. No-op unless Pending.
    fn mark_failed(&self, error: SessionError) -> bool {
        {
            let mut phase = self.phase();
            if !matches!(*phase, Phase::Pending { .. }) {
                return false;
            }
            *phase = Phase::Failed;
        }
        let (listeners, messages) = self.buffer.pending();
        warn!(%error, listeners, messages, "session failed before ready; dropping queued work");
        self.readiness.send_replace(Readiness::Failed(error));
        true
    }

    /// Fail a Pending session with `Destroyed`, or end a Ready one.
    fn mark_destroyed(&self) {
        if self.mark_failed(SessionError::Destroyed) {
            return;
        }
        {
            let mut phase = self.phase();
            if !matches!(*phase, Phase::Ready) {
                return;
            }
            *phase = Phase::Destroyed;
        }
        self.readiness.send_replace(Readiness::Destroyed);
    }

    fn is_ready(&self) -> bool {
        matches!(*self.phase(), Phase::Ready)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// SESSION
// =============================================================================

/// Client handle on one backend's realtime channel.
pub struct TransportSession {
    core: Arc<SessionCore>,
    monitor: Mutex<Option<ReadinessMonitor>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl TransportSession {
    /// Start bootstrapping a session. Must be called from within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns `HttpClientBuild` if the status HTTP client cannot be built.
    pub fn connect(coordinates: ConnectionCoordinates, config: &SessionConfig) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SessionError::HttpClientBuild(e.to_string()))?;

        let monitor = ReadinessMonitor::start(http, &coordinates, &config.stream_suffix, config.ready_timeout);
        let core = Arc::new(SessionCore::new());
        let driver = tokio::spawn(drive(
            core.clone(),
            monitor.subscribe(),
            coordinates.realtime_url,
            config.connect_timeout,
        ));

        Ok(Self {
            core,
            monitor: Mutex::new(Some(monitor)),
            driver: Mutex::new(Some(driver)),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Run `callback` once the session is Ready; immediately if it already is.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) -> ReadySubscription {
        let mut phase = self.core.phase();
        if let Phase::Pending { callbacks } = &mut *phase {
            let id = self.core.next_callback.fetch_add(1, Ordering::Relaxed);
            callbacks.push((id, Box::new(callback)));
            return ReadySubscription { core: Arc::downgrade(&self.core), id: Some(id) };
        }
        let ready = matches!(*phase, Phase::Ready);
        drop(phase);
        if ready {
            callback();
        }
        ReadySubscription::inert()
    }

    pub fn on(&self, event: &str, handler: EventHandler) {
        self.core.buffer.register_listener(event, handler);
    }

    pub fn off(&self, event: &str, handler: &EventHandler) {
        self.core.buffer.unregister_listener(event, handler);
    }

    /// Send `event` with positional `args`, buffering until Ready.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the live link has gone away.
    pub fn send(&self, event: &str, args: Vec<Value>) -> Result<(), SessionError> {
        self.core.buffer.send(Frame::new(event, args))
    }

    /// Send `event` with one serialized payload argument.
    ///
    /// # Errors
    ///
    /// Returns `Serialize` if `payload` does not encode, otherwise as `send`.
    pub fn emit(&self, event: &str, payload: &impl Serialize) -> Result<(), SessionError> {
        let value = serde_json::to_value(payload).map_err(|e| SessionError::Serialize(e.to_string()))?;
        self.send(event, vec![value])
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.core.is_ready()
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.core.readiness.borrow().clone()
    }

    /// Id the relay assigned in its `connected` frame.
    #[must_use]
    pub fn participant_id(&self) -> Option<String> {
        lock(&self.core.participant_id).clone()
    }

    /// Wait until the session is Ready.
    ///
    /// # Errors
    ///
    /// Returns the failure that ended the bootstrap, or `Destroyed` once the
    /// session has been destroyed.
    pub async fn ready(&self) -> Result<(), SessionError> {
        let mut rx = self.core.readiness.subscribe();
        let state = rx
            .wait_for(|r| *r != Readiness::Pending)
            .await
            .map_err(|_| SessionError::Destroyed)?
            .clone();
        match state {
            Readiness::Ready => Ok(()),
            Readiness::Failed(e) => Err(e),
            Readiness::Pending | Readiness::Destroyed => Err(SessionError::Destroyed),
        }
    }

    /// Cancel the monitor and close the link. The session stays terminal
    /// afterwards. Safe to call repeatedly.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut monitor) = lock(&self.monitor).take() {
            monitor.cancel();
        }
        if let Some(driver) = lock(&self.driver).take() {
            driver.abort();
        }
        if let Some(link) = lock(&self.core.link).take() {
            link.close();
        }
        self.core.mark_destroyed();
        info!("session destroyed");
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Handle returned by `on_ready`.
pub struct ReadySubscription {
    core: Weak<SessionCore>,
    id: Option<u64>,
}

impl ReadySubscription {
    fn inert() -> Self {
        Self { core: Weak::new(), id: None }
    }

    /// Drop the callback if it has not fired. No-op once Ready.
    pub fn unsubscribe(self) {
        let (Some(core), Some(id)) = (self.core.upgrade(), self.id) else {
            return;
        };
        if let Phase::Pending { callbacks } = &mut *core.phase() {
            callbacks.retain(|(queued, _)| *queued != id);
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

async fn drive(
    core: Arc<SessionCore>,
    backend: watch::Receiver<MonitorState>,
    realtime_url: String,
    connect_timeout: Duration,
) {
    if let Err(e) = monitor::wait_ready(backend).await {
        core.mark_failed(e.into());
        return;
    }

    let (link, mut inbound) = match link::open(&realtime_url, connect_timeout, core.handlers.clone()).await {
        Ok(pair) => pair,
        Err(e) => {
            core.mark_failed(e);
            return;
        }
    };

    while let Some(frame) = inbound.next_frame().await {
        if frame.event == CONNECTED && !core.is_ready() {
            let participant_id = frame.first_arg().and_then(Value::as_str).map(str::to_owned);
            info!(participant_id = participant_id.as_deref().unwrap_or("-"), "session ready");
            core.mark_ready(link.clone(), participant_id);
        }
        core.handlers.dispatch(&frame.event, &frame.args);
    }

    if !core.mark_failed(SessionError::Closed) {
        info!("realtime link closed");
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
