//! Backend status endpoints.
//!
//! A running relay is by definition ready: the plain-text poll answers
//! `Ready` and the push stream emits a single Ready event, then stays open
//! until the client hangs up.

use std::convert::Infallible;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::response::sse::{Event, Sse};
use futures::Stream;
use futures::stream::{self, StreamExt};

pub async fn status() -> &'static str {
    "Ready"
}

pub async fn status_stream() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let ready = serde_json::json!({ "state": "Ready", "time": now_ms().to_string() });
    let event = Event::default().data(ready.to_string());
    Sse::new(stream::once(async move { Ok::<_, Infallible>(event) }).chain(stream::pending()))
}

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}
