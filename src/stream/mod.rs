//! Reconnecting streaming client with heartbeat-based liveness detection.
//!
//! [`StreamingClient`] manages one physical connection's lifecycle over any
//! [`StreamTransport`]: connect, detect death (close frames, errors, or a
//! silent peer that stops answering pings), and re-establish the connection
//! with bounded exponential backoff. Logical topic fan-out is a higher
//! layer's job; this client hands every inbound frame to its caller.

pub mod transport;

pub use transport::{StreamTransport, TransportEvent, WsTransport};

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::retry::RetryConfig;

/// Transient connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// An inbound frame, parsed as JSON when possible.
///
/// Malformed frames are forwarded raw rather than dropped; parse failures
/// never crash the client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Json(serde_json::Value),
    Raw(String),
}

/// Lifecycle notifications. Observational only; the client's control flow
/// does not depend on whether anyone is subscribed.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// First successful connection.
    Connected,
    /// Connection re-established after a failure.
    Reconnected { attempts: u32 },
    /// The connection closed (failure or intentional disconnect).
    Closed { reason: String },
    /// One reconnect attempt failed.
    ReconnectFailed { attempt: u32 },
    /// The reconnect budget is exhausted; call `connect()` to resume.
    ReconnectsExhausted { attempts: u32 },
}

/// Streaming client configuration: heartbeat cadence and reconnect backoff.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Probe the peer on a fixed interval while connected.
    #[serde(default = "default_heartbeat_enabled")]
    pub heartbeat_enabled: bool,
    /// Interval between liveness probes (milliseconds).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// A probe unanswered for this long means the connection is dead
    /// (milliseconds).
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Delay before the first reconnect attempt (milliseconds).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Cap on the reconnect delay (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied per failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Perturb reconnect delays by ±25%.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Reconnect attempts before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Lifecycle event channel capacity.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_heartbeat_enabled() -> bool {
    true
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_event_capacity() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_enabled: default_heartbeat_enabled(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl StreamConfig {
    /// Reconnect backoff shares its shape with the retry policy.
    fn backoff(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_reconnect_attempts,
            base_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
        }
    }
}

/// Point-in-time connection snapshot for metrics collectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionMetrics {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub uptime: Option<Duration>,
    pub connected_at: Option<DateTime<Utc>>,
}

/// What woke the frame loop.
enum Wake {
    Transport(Option<TransportEvent>),
    HeartbeatTick,
    PongTimeout,
}

/// Reconnecting streaming client over a raw duplex transport.
///
/// Single-owner by design: the client is not safe for concurrent writers
/// without an external serializing layer.
pub struct StreamingClient<T: StreamTransport> {
    transport: T,
    config: StreamConfig,
    state: ConnectionState,
    /// Operator intent, distinct from the transient `state`: cleared only
    /// by `disconnect()`.
    should_reconnect: bool,
    /// Reset to 0 only on a successful connect, never by attempting.
    reconnect_attempts: u32,
    connected_at: Option<(Instant, DateTime<Utc>)>,
    ever_connected: bool,
    heartbeat: Option<tokio::time::Interval>,
    ping_deadline: Option<tokio::time::Instant>,
    events: broadcast::Sender<StreamEvent>,
}

impl<T: StreamTransport> StreamingClient<T> {
    pub fn new(transport: T, config: StreamConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            transport,
            config,
            state: ConnectionState::Disconnected,
            should_reconnect: false,
            reconnect_attempts: 0,
            connected_at: None,
            ever_connected: false,
            heartbeat: None,
            ping_deadline: None,
            events,
        }
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        ConnectionMetrics {
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            uptime: self.connected_at.map(|(at, _)| at.elapsed()),
            connected_at: self.connected_at.map(|(_, at)| at),
        }
    }

    /// Open the connection. No-op when already connecting or connected.
    ///
    /// Also re-arms reconnection after the budget was exhausted.
    pub async fn connect(&mut self) -> Result<()> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Ok(());
        }

        self.should_reconnect = true;
        self.state = ConnectionState::Connecting;

        match self.transport.open().await {
            Ok(()) => {
                self.on_connected();
                Ok(())
            }
            Err(err) => {
                self.state = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    /// Intentional shutdown: clears reconnect intent, cancels the heartbeat
    /// and any pending reconnect, and closes the socket. Safe from any
    /// state, including mid-reconnect.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.should_reconnect = false;
        self.heartbeat = None;
        self.ping_deadline = None;

        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }

        self.state = ConnectionState::Disconnecting;
        let result = self.transport.close().await;
        self.state = ConnectionState::Disconnected;
        self.connected_at = None;
        self.emit(StreamEvent::Closed {
            reason: "client disconnect".into(),
        });
        result
    }

    /// Send a payload over the live connection.
    pub async fn send(&mut self, payload: String) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(Error::ConnectionDropped("not connected".into()));
        }
        self.transport.send(payload).await
    }

    /// Pull the next inbound frame, transparently reconnecting as needed.
    ///
    /// Returns `None` when the client will make no further progress: after
    /// `disconnect()`, or once the reconnect budget is exhausted (a
    /// [`StreamEvent::ReconnectsExhausted`] is emitted exactly once; call
    /// [`connect`](Self::connect) to resume).
    pub async fn next_frame(&mut self) -> Option<StreamFrame> {
        loop {
            if self.state != ConnectionState::Connected {
                if !self.should_reconnect {
                    return None;
                }
                if self.reconnect_attempts >= self.config.max_reconnect_attempts {
                    warn!(
                        attempts = self.reconnect_attempts,
                        "Reconnect budget exhausted, giving up"
                    );
                    self.should_reconnect = false;
                    self.emit(StreamEvent::ReconnectsExhausted {
                        attempts: self.reconnect_attempts,
                    });
                    return None;
                }
                if let Err(err) = self.reconnect().await {
                    warn!(error = %err, "Reconnection attempt failed, will retry");
                }
                continue;
            }

            match self.wait_for_wake().await {
                Wake::Transport(Some(TransportEvent::Text(text))) => {
                    return Some(parse_frame(text));
                }
                Wake::Transport(Some(TransportEvent::Pong)) => {
                    debug!("Heartbeat answered");
                    self.ping_deadline = None;
                }
                Wake::Transport(Some(TransportEvent::Closed { reason })) => {
                    warn!(reason = %reason, "Connection lost");
                    self.on_closed(reason);
                }
                Wake::Transport(None) => {
                    self.on_closed("transport not open".into());
                }
                Wake::HeartbeatTick => {
                    if let Err(err) = self.transport.ping().await {
                        warn!(error = %err, "Heartbeat send failed");
                        self.on_closed("heartbeat send failed".into());
                    } else if self.ping_deadline.is_none() {
                        // The deadline tracks the oldest unanswered probe;
                        // later ticks must not push it forward.
                        self.ping_deadline = Some(
                            tokio::time::Instant::now()
                                + Duration::from_millis(self.config.heartbeat_timeout_ms),
                        );
                    }
                }
                Wake::PongTimeout => {
                    // The only detector of a silently dead connection.
                    warn!("Heartbeat timed out, terminating connection");
                    let _ = self.transport.close().await;
                    self.on_closed("heartbeat timeout".into());
                }
            }
        }
    }

    async fn wait_for_wake(&mut self) -> Wake {
        let transport = &mut self.transport;
        let heartbeat = &mut self.heartbeat;
        let ping_deadline = self.ping_deadline;

        tokio::select! {
            event = transport.next_event() => Wake::Transport(event),
            _ = async {
                match heartbeat.as_mut() {
                    Some(interval) => {
                        interval.tick().await;
                    }
                    None => std::future::pending().await,
                }
            } => Wake::HeartbeatTick,
            _ = async {
                match ping_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => Wake::PongTimeout,
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        let backoff = self.config.backoff();
        let delay = backoff.jittered(backoff.delay_for_attempt(self.reconnect_attempts + 1));
        info!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.reconnect_attempts + 1,
            "Reconnecting after delay"
        );
        tokio::time::sleep(delay).await;

        // disconnect() may have been impossible to call concurrently (single
        // owner), but intent can change between frames; honor it post-sleep.
        if !self.should_reconnect {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        match self.transport.open().await {
            Ok(()) => {
                self.on_connected();
                Ok(())
            }
            Err(err) => {
                self.reconnect_attempts += 1;
                self.state = ConnectionState::Disconnected;
                self.emit(StreamEvent::ReconnectFailed {
                    attempt: self.reconnect_attempts,
                });
                Err(err)
            }
        }
    }

    fn on_connected(&mut self) {
        let reconnected = self.ever_connected;
        let attempts = self.reconnect_attempts;

        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.connected_at = Some((Instant::now(), Utc::now()));
        self.ever_connected = true;
        self.ping_deadline = None;

        if self.config.heartbeat_enabled {
            let period = Duration::from_millis(self.config.heartbeat_interval_ms);
            // First tick after one full period, not immediately.
            self.heartbeat = Some(tokio::time::interval_at(
                tokio::time::Instant::now() + period,
                period,
            ));
        }

        if reconnected {
            info!(attempts, "Reconnected");
            self.emit(StreamEvent::Reconnected { attempts });
        } else {
            info!("Connected");
            self.emit(StreamEvent::Connected);
        }
    }

    fn on_closed(&mut self, reason: String) {
        self.state = ConnectionState::Disconnected;
        self.connected_at = None;
        self.heartbeat = None;
        self.ping_deadline = None;
        self.emit(StreamEvent::Closed { reason });
    }

    fn emit(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }
}

fn parse_frame(text: String) -> StreamFrame {
    match serde_json::from_str(&text) {
        Ok(value) => StreamFrame::Json(value),
        Err(err) => {
            warn!(error = %err, bytes = text.len(), "Failed to parse frame, forwarding raw");
            StreamFrame::Raw(text)
        }
    }
}
