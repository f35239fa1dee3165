//! Raw duplex transport seam for the streaming client.
//!
//! [`StreamTransport`] is what collaborators implement: open/close, send,
//! a ping primitive, and an event pull. [`WsTransport`] is the production
//! implementation over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{info, trace};
use url::Url;

use crate::error::{Error, Result};

/// An inbound transport event, already stripped of protocol bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame payload.
    Text(String),
    /// Reply to a liveness probe.
    Pong,
    /// The connection is gone: server close frame, protocol error, or EOF.
    Closed { reason: String },
}

/// A raw duplex connection: open/close/send plus a ping/pong primitive.
#[async_trait]
pub trait StreamTransport: Send {
    async fn open(&mut self) -> Result<()>;

    /// Close the connection. Must be safe to call when not open.
    async fn close(&mut self) -> Result<()>;

    async fn send(&mut self, payload: String) -> Result<()>;

    /// Send a liveness probe. A healthy peer answers with
    /// [`TransportEvent::Pong`].
    async fn ping(&mut self) -> Result<()>;

    /// Pull the next event. `None` means the transport is not open.
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport over `tokio-tungstenite`.
///
/// Protocol pings from the server are answered transparently; only
/// application-relevant events surface to the client.
pub struct WsTransport {
    url: Url,
    ws: Option<WsStream>,
}

impl WsTransport {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| {
            Error::Config(crate::error::ConfigError::InvalidValue {
                field: "ws_url",
                reason: e.to_string(),
            })
        })?;
        Ok(Self { url, ws: None })
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn open(&mut self) -> Result<()> {
        info!(url = %self.url, "Connecting to WebSocket");
        let (ws, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::ConnectionDropped(e.to_string()))?;
        info!(status = %response.status(), "WebSocket connected");
        self.ws = Some(ws);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut ws) = self.ws.take() {
            // Best effort; the peer may already be gone.
            let _ = ws.close(None).await;
        }
        Ok(())
    }

    async fn send(&mut self, payload: String) -> Result<()> {
        let ws = self
            .ws
            .as_mut()
            .ok_or_else(|| Error::ConnectionDropped("not connected".into()))?;
        ws.send(Message::Text(payload))
            .await
            .map_err(|e| Error::ConnectionDropped(e.to_string()))
    }

    async fn ping(&mut self) -> Result<()> {
        let ws = self
            .ws
            .as_mut()
            .ok_or_else(|| Error::ConnectionDropped("not connected".into()))?;
        ws.send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| Error::ConnectionDropped(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        let ws = self.ws.as_mut()?;

        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!(bytes = text.len(), "Received WebSocket text frame");
                    return Some(TransportEvent::Text(text));
                }
                Some(Ok(Message::Ping(data))) => {
                    trace!("Received WebSocket ping");
                    if ws.send(Message::Pong(data)).await.is_err() {
                        return Some(TransportEvent::Closed {
                            reason: "failed to send pong".into(),
                        });
                    }
                }
                Some(Ok(Message::Pong(_))) => return Some(TransportEvent::Pong),
                Some(Ok(Message::Close(frame))) => {
                    info!(frame = ?frame, "WebSocket closed by server");
                    return Some(TransportEvent::Closed {
                        reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                    });
                }
                // Binary and raw frames are ignored.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Some(TransportEvent::Closed {
                        reason: e.to_string(),
                    });
                }
                None => {
                    return Some(TransportEvent::Closed {
                        reason: "stream ended".into(),
                    });
                }
            }
        }
    }
}
