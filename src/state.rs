//! Shared relay state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! owns one `BoardState`: the ordered whiteboard and the live participant
//! set. Every relay instance builds its own `AppState`, so tests can run
//! several isolated relays side by side.
//!
//! Handlers take the write lock for the whole of one inbound message, which
//! gives run-to-completion semantics: the mutation and every broadcast it
//! causes are enqueued before the next message is looked at.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::frame::Frame;

// =============================================================================
// SHAPE
// =============================================================================

/// One whiteboard shape. Identity is `id`; everything else is mutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub color: String,
}

/// The mutable geometry of a shape, as carried by `update-shape`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Shape {
    #[must_use]
    pub fn geometry(&self) -> Geometry {
        Geometry { x: self.x, y: self.y, w: self.w, h: self.h }
    }

    fn apply(&mut self, geometry: Geometry) {
        self.x = geometry.x;
        self.y = geometry.y;
        self.w = geometry.w;
        self.h = geometry.h;
    }
}

// =============================================================================
// WHITEBOARD
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WhiteboardError {
    #[error("shape already exists: {0}")]
    DuplicateShape(String),
}

/// Ordered shape list. Insertion order is snapshot order; ids are unique.
#[derive(Debug, Default)]
pub struct WhiteboardState {
    shapes: Vec<Shape>,
}

impl WhiteboardState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    #[cfg(test)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.id == id)
    }

    /// Append a shape.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateShape` if a shape with the same id is already stored.
    pub fn insert(&mut self, shape: Shape) -> Result<(), WhiteboardError> {
        if self.get(&shape.id).is_some() {
            return Err(WhiteboardError::DuplicateShape(shape.id));
        }
        self.shapes.push(shape);
        Ok(())
    }

    /// Overwrite the geometry of the shape with `id` in place.
    /// Returns `None` if no such shape exists.
    pub fn update_geometry(&mut self, id: &str, geometry: Geometry) -> Option<&Shape> {
        let shape = self.shapes.iter_mut().find(|s| s.id == id)?;
        shape.apply(geometry);
        Some(shape)
    }
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// A frame waiting in a participant's outbound queue.
#[derive(Debug)]
struct Queued {
    frame: Frame,
    volatile: bool,
}

/// Outbound side of one live connection.
///
/// Every frame goes through one unbounded queue, so the participant sees
/// frames in the order they were enqueued whatever their class. Volatile
/// frames are refused at enqueue while `volatile_capacity` of them are
/// already waiting, so a slow reader only ever sees recent cursor positions.
#[derive(Debug, Clone)]
pub struct Participant {
    tx: mpsc::UnboundedSender<Queued>,
    volatile_queued: Arc<AtomicUsize>,
    volatile_capacity: usize,
}

/// Receiving end of a participant's outbound queue, owned by its
/// connection task.
#[derive(Debug)]
pub struct Outbox {
    rx: mpsc::UnboundedReceiver<Queued>,
    volatile_queued: Arc<AtomicUsize>,
}

impl Participant {
    /// Create a participant and the outbox its connection task drains.
    #[must_use]
    pub fn channel(volatile_capacity: usize) -> (Self, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let volatile_queued = Arc::new(AtomicUsize::new(0));
        let participant = Self { tx, volatile_queued: volatile_queued.clone(), volatile_capacity };
        (participant, Outbox { rx, volatile_queued })
    }

    /// Queue a frame for reliable delivery. Returns `false` if the
    /// connection task is already gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.tx.send(Queued { frame, volatile: false }).is_ok()
    }

    /// Queue a frame for best-effort delivery. Returns `false` if dropped.
    pub fn send_volatile(&self, frame: Frame) -> bool {
        let capacity = self.volatile_capacity;
        let reserved = self
            .volatile_queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < capacity).then_some(n + 1))
            .is_ok();
        if !reserved {
            return false;
        }
        if self.tx.send(Queued { frame, volatile: true }).is_err() {
            self.volatile_queued.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }
}

impl Outbox {
    /// Next queued frame, in enqueue order. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        let queued = self.rx.recv().await?;
        Some(self.release(queued))
    }

    #[cfg(test)]
    fn try_recv(&mut self) -> Option<(Frame, bool)> {
        let queued = self.rx.try_recv().ok()?;
        let volatile = queued.volatile;
        Some((self.release(queued), volatile))
    }

    fn release(&self, queued: Queued) -> Frame {
        if queued.volatile {
            self.volatile_queued.fetch_sub(1, Ordering::AcqRel);
        }
        queued.frame
    }
}

// =============================================================================
// BOARD STATE
// =============================================================================

/// The authoritative whiteboard plus every open connection.
#[derive(Debug, Default)]
pub struct BoardState {
    pub whiteboard: WhiteboardState,
    /// Open connections: `participant_id` -> outbound queue.
    pub participants: HashMap<Uuid, Participant>,
}

impl BoardState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared relay state, injected into Axum handlers via State extractor.
#[derive(Clone)]
pub struct AppState {
    pub board: Arc<RwLock<BoardState>>,
    pub config: RelayConfig,
}

impl AppState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self { board: Arc::new(RwLock::new(BoardState::new())), config }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
