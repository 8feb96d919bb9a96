//! Command buffer — defers listener registrations and outgoing frames until
//! the realtime transport is live.
//!
//! DESIGN
//! ======
//! The buffer is in one of two modes:
//! - `Queueing`: calls append to FIFO queues
//! - `PassThrough`: calls go straight to the transport
//!
//! `flush` is the only transition. It drains listeners first, then frames,
//! while holding the mode lock, so a call racing with the flush either lands
//! in the queue before the drain or goes to the transport after it. Nothing
//! is dropped and nothing is applied twice.
//!
//! Outgoing args are owned `Value`s, so a queued frame is already a value
//! snapshot of what the caller passed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use super::SessionError;
use super::handlers::EventHandler;
use crate::frame::Frame;

// =============================================================================
// TRANSPORT SEAM
// =============================================================================

/// A live realtime link the buffer can drain into.
pub trait Transport: Send + Sync {
    fn attach(&self, event: &str, handler: EventHandler);

    fn detach(&self, event: &str, handler: &EventHandler);

    /// Hand one frame to the link for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed or the frame cannot be encoded.
    fn transmit(&self, frame: Frame) -> Result<(), SessionError>;

    fn close(&self) {}
}

// =============================================================================
// BUFFER
// =============================================================================

struct QueuedListener {
    event: String,
    handler: EventHandler,
}

enum BufferMode {
    Queueing {
        listeners: VecDeque<QueuedListener>,
        messages: VecDeque<Frame>,
    },
    PassThrough(Arc<dyn Transport>),
}

pub struct CommandBuffer {
    mode: Mutex<BufferMode>,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self { mode: Mutex::new(BufferMode::Queueing { listeners: VecDeque::new(), messages: VecDeque::new() }) }
    }

    pub fn register_listener(&self, event: &str, handler: EventHandler) {
        match &mut *self.lock() {
            BufferMode::Queueing { listeners, .. } => {
                listeners.push_back(QueuedListener { event: event.to_string(), handler });
            }
            BufferMode::PassThrough(transport) => transport.attach(event, handler),
        }
    }

    /// Removes the first queued registration matching `event` and `handler`.
    pub fn unregister_listener(&self, event: &str, handler: &EventHandler) {
        match &mut *self.lock() {
            BufferMode::Queueing { listeners, .. } => {
                if let Some(pos) = listeners
                    .iter()
                    .position(|l| l.event == event && Arc::ptr_eq(&l.handler, handler))
                {
                    listeners.remove(pos);
                }
            }
            BufferMode::PassThrough(transport) => transport.detach(event, handler),
        }
    }

    /// Queue `frame`, or transmit it once the buffer has been flushed.
    ///
    /// # Errors
    ///
    /// Only a pass-through transmit can fail.
    pub fn send(&self, frame: Frame) -> Result<(), SessionError> {
        match &mut *self.lock() {
            BufferMode::Queueing { messages, .. } => {
                messages.push_back(frame);
                Ok(())
            }
            BufferMode::PassThrough(transport) => transport.transmit(frame),
        }
    }

    /// Drain everything into `transport` and switch to pass-through.
    ///
    /// Returns `false` without touching `transport` if already flushed.
    pub fn flush(&self, transport: Arc<dyn Transport>) -> bool {
        let mut mode = self.lock();
        let BufferMode::Queueing { listeners, messages } = &mut *mode else {
            warn!("command buffer already flushed; ignoring");
            return false;
        };

        debug!(listeners = listeners.len(), messages = messages.len(), "flushing command buffer");
        for QueuedListener { event, handler } in listeners.drain(..) {
            transport.attach(&event, handler);
        }
        for frame in messages.drain(..) {
            let event = frame.event.clone();
            if let Err(e) = transport.transmit(frame) {
                warn!(%event, error = %e, "queued frame not delivered");
            }
        }

        *mode = BufferMode::PassThrough(transport);
        true
    }

    /// Queued (listeners, messages). Both zero once flushed.
    #[must_use]
    pub fn pending(&self) -> (usize, usize) {
        match &*self.lock() {
            BufferMode::Queueing { listeners, messages } => (listeners.len(), messages.len()),
            BufferMode::PassThrough(_) => (0, 0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferMode> {
        self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod tests;
