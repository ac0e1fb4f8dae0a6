//! Connection state of the WhatsApp session.
//!
//! The gate is the single owner of the connected flag. Only connection
//! updates coming from the session provider move it; readers (the HTTP API,
//! the event relay) observe it through a `watch` channel without locking.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::session_events::{ConnectionPhase, ConnectionUpdate};

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
/// Disconnect status the session library uses for an invalidated login.
pub const LOGGED_OUT_STATUS_CODE: u16 = 401;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl ConnectionState {
    /// Label reported by `/health`.
    pub fn health_label(self) -> &'static str {
        match self {
            Self::Connected => "conectado",
            Self::Disconnected => "desconectado",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Reconnect { delay: Duration },
    /// Credentials were invalidated; reconnecting cannot succeed.
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What applying a connection update changed.
pub enum GateTransition {
    Unchanged,
    BecameConnected,
    Disconnected(ReconnectDecision),
}

#[derive(Debug, Clone)]
/// Public struct `ConnectionGate` shared by the supervisor, relay and gateway.
pub struct ConnectionGate {
    state_tx: Arc<watch::Sender<ConnectionState>>,
    reconnect_delay: Duration,
}

impl Default for ConnectionGate {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS))
    }
}

impl ConnectionGate {
    pub fn new(reconnect_delay: Duration) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            state_tx: Arc::new(state_tx),
            reconnect_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Applies one provider update and reports the resulting transition.
    ///
    /// A `close` always yields `Disconnected` even when the gate was already
    /// disconnected, since the session behind it is gone either way.
    pub fn apply_update(&self, update: &ConnectionUpdate) -> GateTransition {
        match update.connection {
            Some(ConnectionPhase::Open) => {
                let previous = self.state_tx.send_replace(ConnectionState::Connected);
                if previous == ConnectionState::Connected {
                    GateTransition::Unchanged
                } else {
                    GateTransition::BecameConnected
                }
            }
            Some(ConnectionPhase::Close) => {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                GateTransition::Disconnected(self.classify_disconnect(update))
            }
            Some(ConnectionPhase::Connecting) | None => GateTransition::Unchanged,
        }
    }

    pub fn classify_disconnect(&self, update: &ConnectionUpdate) -> ReconnectDecision {
        if update.disconnect_status_code() == Some(LOGGED_OUT_STATUS_CODE) {
            ReconnectDecision::LoggedOut
        } else {
            ReconnectDecision::Reconnect {
                delay: self.reconnect_delay,
            }
        }
    }
}
