//! Connector error types.

use std::time::Duration;

use super::SpawnError;

/// Broad classification of connector failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server process could not be created.
    SpawnFailure,
    /// A response line was not valid structured data.
    ProtocolParseFailure,
    /// A command was issued without a live process.
    NotRunning,
    /// The process went away while work was outstanding.
    UnexpectedClose,
    /// The connector was used outside its lifecycle.
    Lifecycle,
    /// A response did not arrive in time.
    Timeout,
}

/// Errors surfaced by the connector.
#[derive(thiserror::Error, Debug)]
pub enum ConnectorError {
    /// Failed to spawn the server process.
    #[error("Failed to spawn server: {0}")]
    Spawn(#[from] SpawnError),

    /// A response could not be interpreted as JSON.
    #[error("Failed to parse response {line:?}: {reason}")]
    ProtocolParse { line: String, reason: String },

    /// No server process is running.
    #[error("Server process is not running")]
    NotRunning,

    /// The connection closed before the request completed.
    #[error("Connection closed (exit code {exit_code:?})")]
    ConnectionClosed { exit_code: Option<i32> },

    /// `start` was called on a connector that is not idle.
    #[error("Connector already started")]
    AlreadyStarted,

    /// No response arrived within the configured timeout.
    #[error("No response to {command:?} after {after:?}")]
    Timeout { command: String, after: Duration },
}

impl ConnectorError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Spawn(_) => ErrorKind::SpawnFailure,
            Self::ProtocolParse { .. } => ErrorKind::ProtocolParseFailure,
            Self::NotRunning => ErrorKind::NotRunning,
            Self::ConnectionClosed { .. } => ErrorKind::UnexpectedClose,
            Self::AlreadyStarted => ErrorKind::Lifecycle,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Build a parse error from a `serde_json` failure.
    #[must_use]
    pub fn parse(line: &str, err: &serde_json::Error) -> Self {
        Self::ProtocolParse {
            line: line.to_string(),
            reason: err.to_string(),
        }
    }
}
