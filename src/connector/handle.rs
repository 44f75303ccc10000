//! Public connector handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use super::task::{ConnectorTask, Request, TaskSettings};
use super::{
    ConnectorError, ConnectorEvent, ConnectorState, ConnectorStateMachine, ConnectorStats,
    EventBroadcaster, EventKind, Listener, ListenerError, ServerCommand, ServerProcess,
    DEFAULT_READY_MARKER,
};
use crate::config::ConnectorConfig;

/// Default timeout for graceful process termination.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Response to a submitted command that has not arrived yet.
#[derive(Debug)]
#[must_use = "a pending response does nothing unless awaited"]
pub struct PendingResponse {
    command: String,
    rx: oneshot::Receiver<Result<String, ConnectorError>>,
    timeout: Option<Duration>,
}

impl PendingResponse {
    /// The command this response belongs to.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wait for the correlated response line.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the server went away first, or
    /// `Timeout` if a request timeout is configured and elapses.
    pub async fn wait(self) -> Result<String, ConnectorError> {
        let received = match self.timeout {
            Some(after) => tokio::time::timeout(after, self.rx)
                .await
                .map_err(|_| ConnectorError::Timeout {
                    command: self.command,
                    after,
                })?,
            None => self.rx.await,
        };
        received.map_err(|_| ConnectorError::ConnectionClosed { exit_code: None })?
    }
}

/// Connection to a line-oriented server running as a child process.
///
/// A connector is single use: it starts once, and after the process exits
/// or [`stop`](Self::stop) is called it stays closed.
pub struct Connector {
    id: Uuid,
    command: ServerCommand,
    settings: TaskSettings,
    request_timeout: Option<Duration>,
    state: Arc<ConnectorStateMachine>,
    event_tx: broadcast::Sender<ConnectorEvent>,
    events: Option<EventBroadcaster>,
    inbox: Option<mpsc::UnboundedSender<Request>>,
    task: Option<JoinHandle<Option<i32>>>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Create an idle connector for the given server command.
    #[must_use]
    pub fn new(command: ServerCommand) -> Self {
        let events = EventBroadcaster::new();
        Self {
            id: Uuid::new_v4(),
            command,
            settings: TaskSettings {
                ready_marker: DEFAULT_READY_MARKER.to_string(),
                terminate_timeout: DEFAULT_TERMINATE_TIMEOUT,
            },
            request_timeout: None,
            state: Arc::new(ConnectorStateMachine::new()),
            event_tx: events.sender(),
            events: Some(events),
            inbox: None,
            task: None,
        }
    }

    /// Create an idle connector from configuration.
    #[must_use]
    pub fn from_config(config: &ConnectorConfig) -> Self {
        let mut connector = Self::new(config.server_command())
            .with_ready_marker(config.ready_marker.clone())
            .with_terminate_timeout(config.terminate_timeout());
        connector.request_timeout = config.request_timeout();
        connector
    }

    /// Set the substring that signals readiness.
    #[must_use]
    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.settings.ready_marker = marker.into();
        self
    }

    /// Set how long `stop` waits after SIGTERM before killing.
    #[must_use]
    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.settings.terminate_timeout = timeout;
        self
    }

    /// Fail commands whose response takes longer than `timeout`.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> ConnectorState {
        self.state.state()
    }

    /// Exit code of the server, known once the connector has closed.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.state.exit_code()
    }

    /// Register a listener for one kind of event.
    ///
    /// Listeners registered after the connector closed are never called.
    /// A listener registered while the task is draining output after the
    /// process exited still sees the close event.
    pub fn on<F>(&mut self, kind: EventKind, listener: F)
    where
        F: FnMut(&ConnectorEvent) -> Result<(), ListenerError> + Send + 'static,
    {
        let listener: Listener = Box::new(listener);
        if let Some(events) = self.events.as_mut() {
            events.on(kind, listener);
        } else if let Some(inbox) = &self.inbox {
            if inbox.send(Request::Listen { kind, listener }).is_err() {
                tracing::debug!(?kind, "Connector closed, listener dropped");
            }
        }
    }

    /// Subscribe to all events on a broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.event_tx.subscribe()
    }

    /// All events as a stream. Events missed by a lagging consumer are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = ConnectorEvent> {
        BroadcastStream::new(self.subscribe()).filter_map(Result::ok)
    }

    /// Spawn the server process and begin processing its output.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` if the connector is not idle, or `Spawn` if
    /// the process could not be created. A spawn failure closes the
    /// connector for good.
    pub fn start(&mut self) -> Result<(), ConnectorError> {
        if self.state() != ConnectorState::Idle {
            return Err(ConnectorError::AlreadyStarted);
        }
        let Some(mut events) = self.events.take() else {
            return Err(ConnectorError::AlreadyStarted);
        };

        let span = tracing::info_span!("connector", id = %self.id);
        let _guard = span.enter();
        self.state.transition(ConnectorState::Starting);

        let spawned = ServerProcess::spawn(&self.command).and_then(|mut process| {
            let streams = process.take_streams()?;
            Ok((process, streams))
        });
        let (process, streams) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!(program = %self.command.program(), error = %e, "Failed to start server");
                self.state.close(None);
                events.emit(ConnectorEvent::Close {
                    exit_code: None,
                    stats: ConnectorStats::default(),
                });
                return Err(e.into());
            }
        };

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        self.state.transition(ConnectorState::AwaitingReady);
        let task = ConnectorTask::spawn(
            process,
            streams,
            &self.settings,
            events,
            Arc::clone(&self.state),
            inbox_rx,
            span.clone(),
        );
        self.inbox = Some(inbox_tx);
        self.task = Some(task);
        tracing::info!(program = %self.command.program(), "Server started");
        Ok(())
    }

    /// Wait until the server has printed its readiness marker.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` if the connector was never started and
    /// `ConnectionClosed` if it closed before becoming ready.
    pub async fn wait_ready(&self) -> Result<(), ConnectorError> {
        if self.state() == ConnectorState::Idle {
            return Err(ConnectorError::NotRunning);
        }
        let mut rx = self.state.watch();
        let state = *rx
            .wait_for(|s| matches!(s, ConnectorState::Ready | ConnectorState::Closed))
            .await
            .map_err(|_| ConnectorError::ConnectionClosed { exit_code: None })?;
        if state.is_closed() {
            return Err(ConnectorError::ConnectionClosed {
                exit_code: self.state.exit_code(),
            });
        }
        Ok(())
    }

    /// Wait until the connector has closed.
    pub async fn closed(&self) {
        let mut rx = self.state.watch();
        let _ = rx.wait_for(|s| s.is_closed()).await;
    }

    /// Queue a command and return a handle to its response.
    ///
    /// The command is queued immediately, so the order of `submit` calls is
    /// the order the server sees. Commands submitted before the server is
    /// ready are held back until it is.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` if no server process is live.
    pub fn submit(&self, command: impl Into<String>) -> Result<PendingResponse, ConnectorError> {
        let command = command.into();
        let inbox = self.inbox.as_ref().ok_or(ConnectorError::NotRunning)?;
        if self.state().is_closed() {
            return Err(ConnectorError::NotRunning);
        }

        let (reply, rx) = oneshot::channel();
        inbox
            .send(Request::Send {
                line: command.clone(),
                reply,
            })
            .map_err(|_| ConnectorError::NotRunning)?;

        Ok(PendingResponse {
            command,
            rx,
            timeout: self.request_timeout,
        })
    }

    /// Send a command and wait for its correlated response.
    ///
    /// There is no timeout unless one was configured.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit) and [`PendingResponse::wait`].
    pub async fn send_command(&self, command: impl Into<String>) -> Result<String, ConnectorError> {
        self.submit(command)?.wait().await
    }

    /// Stop the server and wait for the connector to close.
    ///
    /// Calling this more than once is harmless.
    pub async fn stop(&mut self) {
        let Some(inbox) = self.inbox.take() else {
            return;
        };
        let _ = inbox.send(Request::Stop);
        drop(inbox);

        if let Some(task) = self.task.take() {
            match task.await {
                Ok(exit_code) => tracing::debug!(?exit_code, "Connector task finished"),
                Err(e) => tracing::warn!(error = %e, "Connector task failed"),
            }
        }
    }
}
