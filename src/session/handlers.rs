//! Event listener registry for an open realtime link.
//!
//! Handlers are identified by `Arc` pointer, so attaching the same handler
//! twice for one event is a no-op and detaching needs the same `Arc` back.
//! Dispatch clones the handler list first and calls outside the lock, so a
//! handler may attach or detach other handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

/// A realtime event listener. Receives the frame's positional arguments.
pub type EventHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Wrap a closure as an `EventHandler`.
pub fn handler(f: impl Fn(&[Value]) + Send + Sync + 'static) -> EventHandler {
    Arc::new(f)
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, event: &str, handler: EventHandler) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let list = handlers.entry(event.to_string()).or_default();
        if !list.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            list.push(handler);
        }
    }

    /// Returns whether the handler was attached.
    pub fn detach(&self, event: &str, handler: &EventHandler) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event);
        }
        removed
    }

    /// Call every handler for `event` in attach order. Returns how many ran.
    pub fn dispatch(&self, event: &str, args: &[Value]) -> usize {
        let targets = {
            let handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            handlers.get(event).cloned().unwrap_or_default()
        };
        for h in &targets {
            h(args);
        }
        targets.len()
    }

    #[cfg(test)]
    fn count(&self, event: &str) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }
}
