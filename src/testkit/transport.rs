//! Mock [`StreamTransport`] implementations for testing.
//!
//! Two mock transport types for different testing needs:
//!
//! - [`ScriptedTransport`] — Pre-loaded open results and event queue.
//!   Best for: reconnection logic, backoff behavior, frame handling.
//!
//! - [`ChannelTransport`] — Channel-backed transport with an external
//!   control handle. Best for: heartbeat tests and integration tests
//!   needing precise, on-demand event delivery.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::stream::{StreamTransport, TransportEvent};

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

/// A mock transport with scripted open results and a fixed event queue.
///
/// Each `open()` pops the next result from its queue (defaults to `Ok(())`
/// when exhausted). An exhausted event queue reports the connection closed,
/// so scripted scenarios terminate instead of hanging.
pub struct ScriptedTransport {
    open_results: VecDeque<Result<()>>,
    events: VecDeque<TransportEvent>,
    open_count: Arc<AtomicU32>,
    close_count: Arc<AtomicU32>,
    ping_count: Arc<AtomicU32>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            open_results: VecDeque::new(),
            events: VecDeque::new(),
            open_count: Arc::new(AtomicU32::new(0)),
            close_count: Arc::new(AtomicU32::new(0)),
            ping_count: Arc::new(AtomicU32::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_open_results(mut self, results: Vec<Result<()>>) -> Self {
        self.open_results = results.into();
        self
    }

    pub fn with_events(mut self, events: Vec<TransportEvent>) -> Self {
        self.events = events.into();
        self
    }

    /// Shared counter for asserting open call counts.
    pub fn open_count(&self) -> Arc<AtomicU32> {
        self.open_count.clone()
    }

    pub fn close_count(&self) -> Arc<AtomicU32> {
        self.close_count.clone()
    }

    pub fn ping_count(&self) -> Arc<AtomicU32> {
        self.ping_count.clone()
    }

    /// Payloads passed to `send()`, in order.
    pub fn sent(&self) -> Arc<Mutex<Vec<String>>> {
        self.sent.clone()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn open(&mut self) -> Result<()> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        self.open_results.pop_front().unwrap_or(Ok(()))
    }

    async fn close(&mut self) -> Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&mut self, payload: String) -> Result<()> {
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.ping_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        Some(self.events.pop_front().unwrap_or(TransportEvent::Closed {
            reason: "script exhausted".into(),
        }))
    }
}

// ---------------------------------------------------------------------------
// ChannelTransport
// ---------------------------------------------------------------------------

/// A mock transport controlled externally via a [`ChannelTransportHandle`].
///
/// Events are sent into the handle and pulled by the client through
/// `next_event()`. No real network I/O.
pub struct ChannelTransport {
    event_rx: tokio::sync::mpsc::Receiver<TransportEvent>,
    open_count: Arc<AtomicU32>,
    ping_count: Arc<AtomicU32>,
    sent: Arc<Mutex<Vec<String>>>,
    /// When set, every ping is answered with an immediate pong.
    auto_pong: Arc<std::sync::atomic::AtomicBool>,
    pong_tx: tokio::sync::mpsc::Sender<TransportEvent>,
}

/// Control handle for a [`ChannelTransport`].
pub struct ChannelTransportHandle {
    event_tx: tokio::sync::mpsc::Sender<TransportEvent>,
    open_count: Arc<AtomicU32>,
    ping_count: Arc<AtomicU32>,
    sent: Arc<Mutex<Vec<String>>>,
    auto_pong: Arc<std::sync::atomic::AtomicBool>,
}

impl ChannelTransportHandle {
    /// Deliver a text frame to the client.
    pub async fn text(&self, payload: impl Into<String>) {
        let _ = self
            .event_tx
            .send(TransportEvent::Text(payload.into()))
            .await;
    }

    /// Deliver a pong (answering an in-flight heartbeat probe).
    pub async fn pong(&self) {
        let _ = self.event_tx.send(TransportEvent::Pong).await;
    }

    /// Simulate the connection dropping.
    pub async fn drop_connection(&self, reason: impl Into<String>) {
        let _ = self
            .event_tx
            .send(TransportEvent::Closed {
                reason: reason.into(),
            })
            .await;
    }

    /// Answer every subsequent ping with an immediate pong.
    pub fn set_auto_pong(&self, enabled: bool) {
        self.auto_pong.store(enabled, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> u32 {
        self.ping_count.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

/// Create a [`ChannelTransport`] and its control [`ChannelTransportHandle`].
pub fn channel_transport(buffer: usize) -> (ChannelTransport, ChannelTransportHandle) {
    let (tx, rx) = tokio::sync::mpsc::channel(buffer);
    let open_count = Arc::new(AtomicU32::new(0));
    let ping_count = Arc::new(AtomicU32::new(0));
    let sent = Arc::new(Mutex::new(Vec::new()));
    let auto_pong = Arc::new(std::sync::atomic::AtomicBool::new(false));
    (
        ChannelTransport {
            event_rx: rx,
            open_count: open_count.clone(),
            ping_count: ping_count.clone(),
            sent: sent.clone(),
            auto_pong: auto_pong.clone(),
            pong_tx: tx.clone(),
        },
        ChannelTransportHandle {
            event_tx: tx,
            open_count,
            ping_count,
            sent,
            auto_pong,
        },
    )
}

#[async_trait]
impl StreamTransport for ChannelTransport {
    async fn open(&mut self) -> Result<()> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn send(&mut self, payload: String) -> Result<()> {
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.ping_count.fetch_add(1, Ordering::SeqCst);
        if self.auto_pong.load(Ordering::SeqCst) {
            let _ = self.pong_tx.send(TransportEvent::Pong).await;
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.event_rx.recv().await
    }
}
