//! Fake backend pieces shared by the session tests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use futures::stream::{self, BoxStream, StreamExt};

use super::ConnectionCoordinates;

/// Scripted status endpoint pair: `/status` and `/status/stream`.
#[derive(Clone)]
pub(crate) struct FakeStatus {
    poll_status: StatusCode,
    poll_body: &'static str,
    chunks: Vec<String>,
    hold_open: bool,
    stream_hits: Arc<AtomicUsize>,
}

impl FakeStatus {
    pub(crate) fn new(poll_body: &'static str) -> Self {
        Self {
            poll_status: StatusCode::OK,
            poll_body,
            chunks: Vec::new(),
            hold_open: false,
            stream_hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn poll_status(mut self, status: StatusCode) -> Self {
        self.poll_status = status;
        self
    }

    /// Raw chunks written to the push stream, in order.
    pub(crate) fn chunks(mut self, chunks: &[&str]) -> Self {
        self.chunks = chunks.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Keep the push stream open after the scripted chunks.
    pub(crate) fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub(crate) fn stream_hits(&self) -> usize {
        self.stream_hits.load(Ordering::SeqCst)
    }

    pub(crate) fn router(&self) -> Router {
        Router::new()
            .route("/status", get(poll))
            .route("/status/stream", get(push))
            .with_state(self.clone())
    }
}

async fn poll(State(fake): State<FakeStatus>) -> (StatusCode, &'static str) {
    (fake.poll_status, fake.poll_body)
}

async fn push(State(fake): State<FakeStatus>) -> Body {
    fake.stream_hits.fetch_add(1, Ordering::SeqCst);
    let scripted = stream::iter(fake.chunks.into_iter().map(Ok::<_, Infallible>));
    let body: BoxStream<'static, Result<String, Infallible>> = if fake.hold_open {
        scripted.chain(stream::pending()).boxed()
    } else {
        scripted.boxed()
    };
    Body::from_stream(body)
}

pub(crate) async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

pub(crate) fn coordinates(addr: SocketAddr) -> ConnectionCoordinates {
    ConnectionCoordinates {
        realtime_url: format!("http://{addr}/ws"),
        status_url: format!("http://{addr}/status"),
    }
}
