//! Connector state machine.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Lifecycle state of a connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorState {
    #[default]
    Idle,
    Starting,
    AwaitingReady,
    Ready,
    Closed,
}

impl ConnectorState {
    /// Whether `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(self, next: ConnectorState) -> bool {
        use ConnectorState::{AwaitingReady, Closed, Idle, Ready, Starting};
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, AwaitingReady)
                | (AwaitingReady, Ready)
                | (Idle | Starting | AwaitingReady | Ready, Closed)
        )
    }

    #[must_use]
    pub fn is_closed(self) -> bool {
        self == ConnectorState::Closed
    }
}

/// State machine that publishes every transition on a watch channel.
#[derive(Debug)]
pub struct ConnectorStateMachine {
    tx: watch::Sender<ConnectorState>,
    /// Set once, before the Closed transition is published.
    exit_code: OnceLock<Option<i32>>,
}

impl Default for ConnectorStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorStateMachine {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectorState::Idle);
        Self {
            tx,
            exit_code: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectorState {
        *self.tx.borrow()
    }

    /// Observe state changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectorState> {
        self.tx.subscribe()
    }

    /// Move to `new_state`. Illegal transitions are logged and ignored.
    pub fn transition(&self, new_state: ConnectorState) -> bool {
        let current = self.state();
        if !current.can_transition_to(new_state) {
            tracing::debug!(from = ?current, to = ?new_state, "Ignoring invalid state transition");
            return false;
        }
        tracing::debug!(from = ?current, to = ?new_state, "State transition");
        self.tx.send_replace(new_state);
        true
    }

    /// Record the exit code and move to Closed.
    ///
    /// Watchers that see Closed can read the exit code right away.
    pub fn close(&self, exit_code: Option<i32>) -> bool {
        if self.exit_code.set(exit_code).is_err() {
            tracing::debug!(?exit_code, "Connector already closed");
            return false;
        }
        self.transition(ConnectorState::Closed)
    }

    /// Exit code of the server, once closed.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.get().copied().flatten()
    }
}

/// Traffic counters for one connector session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorStats {
    pub lines_received: usize,
    pub commands_written: usize,
    pub responses_correlated: usize,
    pub unsolicited_messages: usize,
}

impl ConnectorStats {
    pub fn record_line(&mut self) {
        self.lines_received = self.lines_received.saturating_add(1);
    }

    pub fn record_command(&mut self) {
        self.commands_written = self.commands_written.saturating_add(1);
    }

    pub fn record_response(&mut self) {
        self.responses_correlated = self.responses_correlated.saturating_add(1);
    }

    pub fn record_unsolicited(&mut self) {
        self.unsolicited_messages = self.unsolicited_messages.saturating_add(1);
    }
}
