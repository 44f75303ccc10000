//! Positional request/response correlation.
//!
//! The wrapped protocol carries no request identifiers, so responses are
//! matched to requests purely by arrival order. The server is assumed to
//! answer in the order it was asked; this is not verified.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use super::ConnectorError;

/// Completion handle for one outstanding command.
pub type Resolver = oneshot::Sender<Result<String, ConnectorError>>;

/// FIFO queue of resolvers awaiting a response line.
#[derive(Debug, Default)]
pub struct ResponseCorrelator {
    pending: VecDeque<Resolver>,
}

impl ResponseCorrelator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver to the tail of the queue.
    ///
    /// Must be called before the matching command is written.
    pub fn register(&mut self, resolver: Resolver) {
        self.pending.push_back(resolver);
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Hand a response line to the oldest pending request.
    ///
    /// Returns the line back when nothing is waiting for it; the caller
    /// treats it as unsolicited.
    pub fn dispatch(&mut self, line: String) -> Option<String> {
        let Some(resolver) = self.pending.pop_front() else {
            return Some(line);
        };
        if resolver.send(Ok(line)).is_err() {
            // Caller gave up; the slot was still theirs.
            tracing::debug!("Discarding response for abandoned request");
        }
        None
    }

    /// Fail every pending request, oldest first.
    pub fn reject_all(&mut self, exit_code: Option<i32>) -> usize {
        let count = self.pending.len();
        for resolver in self.pending.drain(..) {
            let _ = resolver.send(Err(ConnectorError::ConnectionClosed { exit_code }));
        }
        count
    }
}
