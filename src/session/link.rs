//! Live realtime link over a client websocket.
//!
//! The socket is split on open. Writes go through an unbounded channel to a
//! writer task so `transmit` never awaits; reads stay with whoever holds the
//! `Inbound` half.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use super::SessionError;
use super::buffer::Transport;
use super::handlers::{EventHandler, HandlerRegistry};
use crate::frame::Frame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sending half plus the listener registry frames are dispatched through.
pub struct WsLink {
    outbound: mpsc::UnboundedSender<Message>,
    handlers: Arc<HandlerRegistry>,
}

/// Receiving half.
pub struct Inbound {
    stream: SplitStream<WsStream>,
}

/// Connect to `realtime_url` (http(s) URLs are mapped to ws(s)).
///
/// # Errors
///
/// Returns `InvalidUrl` for an unsupported scheme, `Connect` if the
/// handshake fails or exceeds `connect_timeout`.
pub async fn open(
    realtime_url: &str,
    connect_timeout: Duration,
    handlers: Arc<HandlerRegistry>,
) -> Result<(Arc<WsLink>, Inbound), SessionError> {
    let url = ws_url(realtime_url)?;
    let (stream, _) = tokio::time::timeout(connect_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| SessionError::Connect(format!("timed out after {connect_timeout:?}")))?
        .map_err(|e| SessionError::Connect(e.to_string()))?;
    debug!(%url, "realtime link open");

    let (sink, stream) = stream.split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(sink, rx));

    Ok((Arc::new(WsLink { outbound: tx, handlers }), Inbound { stream }))
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            debug!(error = %e, "realtime link write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

impl Transport for WsLink {
    fn attach(&self, event: &str, handler: EventHandler) {
        self.handlers.attach(event, handler);
    }

    fn detach(&self, event: &str, handler: &EventHandler) {
        self.handlers.detach(event, handler);
    }

    fn transmit(&self, frame: Frame) -> Result<(), SessionError> {
        let text = frame
            .to_text()
            .map_err(|e| SessionError::Serialize(e.to_string()))?;
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| SessionError::Closed)
    }

    fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }
}

impl Inbound {
    /// Next decoded frame. `None` once the peer closes or the socket fails.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match Frame::from_text(text.as_str()) {
                    Ok(frame) => return Some(frame),
                    Err(e) => warn!(error = %e, "dropping undecodable realtime frame"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "realtime link read failed");
                    return None;
                }
            }
        }
    }
}

/// Map an http(s) endpoint to its websocket scheme.
///
/// # Errors
///
/// Returns `InvalidUrl` for any other scheme.
pub fn ws_url(url: &str) -> Result<String, SessionError> {
    if let Some(rest) = url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    if let Some(rest) = url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }
    if url.starts_with("ws://") || url.starts_with("wss://") {
        return Ok(url.to_owned());
    }
    Err(SessionError::InvalidUrl(url.to_owned()))
}
