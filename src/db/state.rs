//! Connection state machine.
//!
//! # States
//! - Disconnected: no session (initial, or lost after success)
//! - Connecting: an attempt is in flight
//! - Connected: a session is live
//! - Errored: the last attempt failed, a retry may follow
//!
//! # State Transitions
//! ```text
//! Disconnected → Connecting
//! Connecting → Connected | Errored
//! Errored → Connecting (retry)
//! Connected → Disconnected (heartbeat failed)
//! ```
//!
//! Only the connector drives transitions; everyone else observes them.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::observability::metrics;

/// Database connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Errored,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Errored => "errored",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// Connection attempts started so far, counting the one this change belongs to.
    pub attempt: u32,
}

/// Publishes connection state to observers.
///
/// The current state is kept in a watch channel; every transition is also
/// sent on a broadcast channel so subscribers can replay the sequence.
#[derive(Debug)]
pub struct ConnectionMonitor {
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<StateChange>,
    attempts: AtomicU32,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(64);
        Self {
            state,
            events,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver tracking the latest state.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Receiver for every transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    /// Connection attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub(crate) fn transition(&self, to: ConnectionState) -> StateChange {
        let attempt = if to == ConnectionState::Connecting {
            self.attempts.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.attempts()
        };
        let from = self.state.send_replace(to);
        let change = StateChange { from, to, attempt };
        let _ = self.events.send(change);

        metrics::record_connection_state(to);
        tracing::debug!(from = %from, to = %to, attempt, "Connection state changed");
        change
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
