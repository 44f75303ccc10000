//! Background task that owns the server process and its protocol state.
//!
//! Every piece of mutable protocol state (line buffer, readiness flag,
//! pending queue, listeners) lives here and is only touched from this
//! task's loop. Callers talk to it through an unbounded inbox.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use super::{
    ConnectorError, ConnectorEvent, ConnectorState, ConnectorStateMachine, ConnectorStats,
    EventBroadcaster, EventKind, GateOutcome, LineFramer, Listener, ReadinessGate, Resolver,
    ResponseCorrelator, ServerProcess, ServerStreams,
};

/// Size of each stdout read.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long to keep reading stdout after the process has exited.
///
/// Measured from the exit, not from the last read, so a grandchild that
/// inherited stdout cannot hold the connector open.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Message sent from a `Connector` handle to its task.
pub(crate) enum Request {
    Send { line: String, reply: Resolver },
    Listen { kind: EventKind, listener: Listener },
    Stop,
}

/// Per-connector protocol settings.
#[derive(Debug, Clone)]
pub(crate) struct TaskSettings {
    pub(crate) ready_marker: String,
    pub(crate) terminate_timeout: Duration,
}

/// A command waiting for the server to become ready.
struct PendingCommand {
    line: String,
    reply: Resolver,
}

enum Step {
    Read(std::io::Result<usize>),
    Request(Option<Request>),
    Exited(std::io::Result<std::process::ExitStatus>),
    DrainTimeout,
}

pub(crate) struct ConnectorTask {
    process: ServerProcess,
    framer: LineFramer,
    gate: ReadinessGate<PendingCommand>,
    correlator: ResponseCorrelator,
    events: EventBroadcaster,
    state: Arc<ConnectorStateMachine>,
    stats: ConnectorStats,
    inbox: mpsc::UnboundedReceiver<Request>,
    writer: mpsc::UnboundedSender<String>,
    terminate_timeout: Duration,
}

impl ConnectorTask {
    /// Wire up the process streams and spawn the task.
    ///
    /// The returned handle resolves to the process exit code.
    pub(crate) fn spawn(
        process: ServerProcess,
        streams: ServerStreams,
        settings: &TaskSettings,
        events: EventBroadcaster,
        state: Arc<ConnectorStateMachine>,
        inbox: mpsc::UnboundedReceiver<Request>,
        span: tracing::Span,
    ) -> JoinHandle<Option<i32>> {
        let ServerStreams {
            stdin,
            stdout,
            stderr,
        } = streams;

        let (writer, writer_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(stdin, writer_rx).instrument(span.clone()));
        tokio::spawn(log_stderr(stderr).instrument(span.clone()));

        let task = Self {
            process,
            framer: LineFramer::new(),
            gate: ReadinessGate::new(settings.ready_marker.as_str()),
            correlator: ResponseCorrelator::new(),
            events,
            state,
            stats: ConnectorStats::default(),
            inbox,
            writer,
            terminate_timeout: settings.terminate_timeout,
        };

        tokio::spawn(task.run(stdout).instrument(span))
    }

    async fn run(mut self, mut stdout: ChildStdout) -> Option<i32> {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut stdout_open = true;
        let mut inbox_open = true;
        let mut exited: Option<Option<i32>> = None;
        let mut drain_deadline: Option<Instant> = None;

        loop {
            if exited.is_some() && !stdout_open {
                break;
            }
            if exited.is_some() && drain_deadline.is_none() {
                drain_deadline = Some(Instant::now() + DRAIN_GRACE);
            }

            let step = tokio::select! {
                read = stdout.read(&mut buf), if stdout_open => Step::Read(read),
                request = self.inbox.recv(), if inbox_open => Step::Request(request),
                status = self.process.wait(), if exited.is_none() => Step::Exited(status),
                () = tokio::time::sleep_until(drain_deadline.unwrap_or_else(Instant::now)),
                    if drain_deadline.is_some() => Step::DrainTimeout,
            };

            match step {
                Step::Read(Ok(0)) => {
                    stdout_open = false;
                    if let Some(rest) = self.framer.finish() {
                        tracing::debug!(fragment = %rest, "Discarding unterminated trailing output");
                    }
                }
                Step::Read(Ok(n)) => {
                    for line in self.framer.push(&buf[..n]) {
                        self.dispatch(line);
                    }
                }
                Step::Read(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to read server stdout");
                    stdout_open = false;
                }
                Step::Request(Some(Request::Send { line, reply })) => match exited {
                    None => self.submit(PendingCommand { line, reply }),
                    Some(exit_code) => {
                        tracing::debug!(command = %line, "Server already exited, rejecting command");
                        let _ = reply.send(Err(ConnectorError::ConnectionClosed { exit_code }));
                    }
                },
                Step::Request(Some(Request::Listen { kind, listener })) => {
                    self.events.on(kind, listener);
                }
                Step::Request(Some(Request::Stop)) => {
                    if exited.is_none() {
                        tracing::debug!("Stop requested");
                        exited = Some(self.terminate().await);
                    }
                }
                Step::Request(None) => {
                    inbox_open = false;
                    if exited.is_none() {
                        tracing::debug!("All connector handles dropped, stopping server");
                        exited = Some(self.terminate().await);
                    }
                }
                Step::Exited(Ok(status)) => {
                    tracing::debug!(%status, "Server process exited");
                    exited = Some(status.code());
                }
                Step::Exited(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to wait for server process");
                    exited = Some(None);
                }
                Step::DrainTimeout => {
                    tracing::debug!("Stdout still open after exit, giving up on it");
                    break;
                }
            }
        }

        let exit_code = exited.flatten();
        self.close(exit_code);
        exit_code
    }

    /// Route one complete line from stdout.
    fn dispatch(&mut self, line: String) {
        self.stats.record_line();
        tracing::trace!(line = %line, "Received line");

        if let GateOutcome::Opened(deferred) = self.gate.observe(&line) {
            tracing::info!(deferred = deferred.len(), "Server ready");
            self.state.transition(ConnectorState::Ready);
            self.events.emit(ConnectorEvent::Ready);
            for command in deferred {
                self.write(command);
            }
            return;
        }

        match self.correlator.dispatch(line) {
            None => self.stats.record_response(),
            Some(line) => {
                self.stats.record_unsolicited();
                tracing::info!(message = %line, "Unsolicited server message");
                self.events.emit(ConnectorEvent::Message(line));
            }
        }
    }

    fn submit(&mut self, command: PendingCommand) {
        match self.gate.admit(command) {
            Some(command) => self.write(command),
            None => tracing::debug!("Deferring command until server is ready"),
        }
    }

    /// Register the resolver, then hand the line to the writer.
    fn write(&mut self, command: PendingCommand) {
        let PendingCommand { line, reply } = command;
        self.correlator.register(reply);
        tracing::debug!(command = %line, pending = self.correlator.pending_len(), "Sending command");
        if self.writer.send(line).is_err() {
            tracing::warn!("Server stdin writer has stopped");
        }
        self.stats.record_command();
    }

    async fn terminate(&mut self) -> Option<i32> {
        match self.process.terminate(self.terminate_timeout).await {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to terminate server process");
                None
            }
        }
    }

    fn close(mut self, exit_code: Option<i32>) {
        self.state.close(exit_code);

        let mut rejected = self.correlator.reject_all(exit_code);
        for command in self.gate.drain_deferred() {
            let _ = command
                .reply
                .send(Err(ConnectorError::ConnectionClosed { exit_code }));
            rejected += 1;
        }
        self.inbox.close();
        while let Ok(request) = self.inbox.try_recv() {
            if let Request::Send { reply, .. } = request {
                let _ = reply.send(Err(ConnectorError::ConnectionClosed { exit_code }));
                rejected += 1;
            }
        }

        if rejected > 0 {
            tracing::warn!(rejected, "Rejected requests still pending at close");
        }
        tracing::info!(
            exit_code = ?exit_code,
            lines = self.stats.lines_received,
            commands = self.stats.commands_written,
            responses = self.stats.responses_correlated,
            unsolicited = self.stats.unsolicited_messages,
            "Server connection closed"
        );
        self.events.emit(ConnectorEvent::Close {
            exit_code,
            stats: self.stats,
        });
    }
}

async fn write_loop(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "Failed to write to server stdin");
            break;
        }
        if let Err(e) = stdin.flush().await {
            tracing::warn!(error = %e, "Failed to flush server stdin");
            break;
        }
    }
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    tracing::warn!(stderr = %line, "Server stderr");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading server stderr");
                break;
            }
        }
    }
}
