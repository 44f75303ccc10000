//! Connector lifecycle events and listener fan-out.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::broadcast;

use super::ConnectorStats;

/// Default capacity for the event broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Kind of event a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    Message,
    Close,
}

/// Event emitted by a connector.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    /// The server printed its readiness marker.
    Ready,
    /// A line arrived that no pending request claimed.
    Message(String),
    /// The server process is gone.
    Close {
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Traffic counters for the whole session.
        stats: ConnectorStats,
    },
}

impl ConnectorEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready => EventKind::Ready,
            Self::Message(_) => EventKind::Message,
            Self::Close { .. } => EventKind::Close,
        }
    }
}

/// Error type listeners may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked for each matching event.
pub type Listener = Box<dyn FnMut(&ConnectorEvent) -> Result<(), ListenerError> + Send>;

/// Delivers events to registered listeners and broadcast subscribers.
///
/// `Ready` and `Close` are delivered at most once each. Listeners run in
/// registration order; an error or panic in one is logged and the rest
/// still run.
pub struct EventBroadcaster {
    listeners: Vec<(EventKind, Listener)>,
    tx: broadcast::Sender<ConnectorEvent>,
    ready_sent: bool,
    close_sent: bool,
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("listeners", &self.listeners.len())
            .field("ready_sent", &self.ready_sent)
            .field("close_sent", &self.close_sent)
            .finish_non_exhaustive()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        Self {
            listeners: Vec::new(),
            tx,
            ready_sent: false,
            close_sent: false,
        }
    }

    /// Register a listener for one event kind.
    pub fn on(&mut self, kind: EventKind, listener: Listener) {
        self.listeners.push((kind, listener));
    }

    /// A handle to the broadcast channel, for subscribing later.
    #[must_use]
    pub fn sender(&self) -> broadcast::Sender<ConnectorEvent> {
        self.tx.clone()
    }

    /// Subscribe to every event on the broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.iter().filter(|(k, _)| *k == kind).count()
    }

    /// Deliver an event. Returns `false` if it was suppressed as a repeat.
    pub fn emit(&mut self, event: ConnectorEvent) -> bool {
        let kind = event.kind();
        match kind {
            EventKind::Ready if self.ready_sent => return false,
            EventKind::Close if self.close_sent => return false,
            EventKind::Ready => self.ready_sent = true,
            EventKind::Close => self.close_sent = true,
            EventKind::Message => {}
        }

        for (index, (_, listener)) in self
            .listeners
            .iter_mut()
            .filter(|(k, _)| *k == kind)
            .enumerate()
        {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(?kind, listener = index, error = %e, "Event listener failed");
                }
                Err(_) => {
                    tracing::error!(?kind, listener = index, "Event listener panicked");
                }
            }
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
        true
    }
}
