use serde::Serialize;
use tracing::{info, warn};

/// Lifecycle events reported by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Open,
    Close,
    Error(String),
    /// Attempt number as reported by the transport; `None` coerces to 0.
    ReconnectAttempt(Option<i64>),
    /// The transport gave up reconnecting.
    ReconnectFailed,
}

/// Connectivity as seen by observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reconnecting: bool,
    pub reconnect_attempts: u32,
    /// Sticky: set when reconnecting gives up, cleared only by the next open.
    pub reconnect_error: bool,
    pub last_error: Option<String>,
    /// Number of successful opens so far.
    pub sessions: u64,
}

impl ConnectionStatus {
    /// Apply one event.  Returns true when the event is an open that
    /// follows an earlier session, i.e. the collections may be stale.
    pub fn apply(&mut self, event: &ConnectionEvent) -> bool {
        match event {
            ConnectionEvent::Open => self.on_open(),
            ConnectionEvent::Close => {
                self.on_close();
                false
            }
            ConnectionEvent::Error(err) => {
                self.on_error(err);
                false
            }
            ConnectionEvent::ReconnectAttempt(count) => {
                self.on_reconnect_attempt(*count);
                false
            }
            ConnectionEvent::ReconnectFailed => {
                self.on_reconnect_failed();
                false
            }
        }
    }

    pub fn on_open(&mut self) -> bool {
        info!("connection: open (session {})", self.sessions + 1);
        self.connected = true;
        self.reconnecting = false;
        self.reconnect_error = false;
        self.reconnect_attempts = 0;
        self.sessions += 1;
        self.sessions > 1
    }

    pub fn on_close(&mut self) {
        info!("connection: closed");
        self.connected = false;
    }

    pub fn on_error(&mut self, err: &str) {
        warn!("connection: error: {}", err);
        self.last_error = Some(err.to_string());
    }

    pub fn on_reconnect_attempt(&mut self, count: Option<i64>) {
        let count = count
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(0);
        info!("connection: reconnect attempt {}", count);
        self.reconnecting = true;
        self.reconnect_attempts = count;
    }

    pub fn on_reconnect_failed(&mut self) {
        warn!(
            "connection: reconnect failed after {} attempts",
            self.reconnect_attempts
        );
        self.reconnecting = false;
        self.reconnect_error = true;
    }
}
