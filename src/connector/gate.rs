//! One-shot readiness latch.

use std::collections::VecDeque;

/// Marker the context server prints once it accepts commands.
pub const DEFAULT_READY_MARKER: &str = "MCP Server ready";

/// What the gate decided about an inbound line.
#[derive(Debug, PartialEq, Eq)]
pub enum GateOutcome<T> {
    /// The line carried the marker and opened the gate. The line itself is
    /// consumed; the deferred items are released in submission order.
    Opened(Vec<T>),
    /// The line is ordinary traffic.
    Pass,
}

/// Holds items back until the first line containing the marker arrives.
///
/// The transition happens at most once. Later lines containing the marker
/// text are passed through like any other line.
#[derive(Debug)]
pub struct ReadinessGate<T> {
    marker: String,
    ready: bool,
    deferred: VecDeque<T>,
}

impl<T> ReadinessGate<T> {
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            ready: false,
            deferred: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Number of items waiting for readiness.
    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Admit an item. Returns it back if the gate is open, otherwise holds it.
    pub fn admit(&mut self, item: T) -> Option<T> {
        if self.ready {
            Some(item)
        } else {
            self.deferred.push_back(item);
            None
        }
    }

    /// Inspect an inbound line.
    pub fn observe(&mut self, line: &str) -> GateOutcome<T> {
        if self.ready || !line.contains(self.marker.as_str()) {
            return GateOutcome::Pass;
        }
        self.ready = true;
        GateOutcome::Opened(self.deferred.drain(..).collect())
    }

    /// Remove everything still waiting, e.g. when the connection closes.
    pub fn drain_deferred(&mut self) -> Vec<T> {
        self.deferred.drain(..).collect()
    }
}
