//! Server child process: command line, spawning, and termination.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Package launched by default through the platform's `npx`.
pub const DEFAULT_SERVER_PACKAGE: &str = "@upstash/context7-mcp@latest";

/// Why a server process could not be started.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    #[error("Server binary not found: {program}")]
    NotFound { program: String },
    #[error("Permission denied spawning {program}")]
    PermissionDenied { program: String },
    /// A standard stream was not captured.
    #[error("Server {stream} not available")]
    MissingStream { stream: &'static str },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    fn from_io(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                program: program.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                program: program.to_string(),
            },
            _ => Self::Io(err),
        }
    }
}

/// Name of the package runner executable on the current platform.
#[must_use]
pub fn platform_program() -> &'static str {
    if cfg!(windows) {
        "npx.cmd"
    } else {
        "npx"
    }
}

/// Builder for the server command line.
#[derive(Debug, Clone)]
pub struct ServerCommand {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl Default for ServerCommand {
    fn default() -> Self {
        Self {
            program: platform_program().to_string(),
            args: vec!["-y".to_string(), DEFAULT_SERVER_PACKAGE.to_string()],
            working_dir: None,
            env: HashMap::new(),
        }
    }
}

impl ServerCommand {
    /// Create a builder for an arbitrary program with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
        }
    }

    /// Append a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replace the argument list.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory for the server process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable for the server process.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn get_working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

/// The piped standard streams of a server process.
#[derive(Debug)]
pub struct ServerStreams {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// A running server process with all three standard streams piped.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
}

impl ServerProcess {
    /// Spawn the server described by `command`.
    ///
    /// The child is killed if the handle is dropped while it is still running.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(command: &ServerCommand) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = command.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(&command.program, e))?;

        tracing::debug!(
            program = %command.program,
            args = ?command.args,
            pid = ?child.id(),
            "Spawned server process"
        );

        Ok(Self { child })
    }

    /// Take all three standard streams at once.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError::MissingStream` if a stream was already taken.
    pub fn take_streams(&mut self) -> Result<ServerStreams, SpawnError> {
        let child = &mut self.child;
        Ok(ServerStreams {
            stdin: child
                .stdin
                .take()
                .ok_or(SpawnError::MissingStream { stream: "stdin" })?,
            stdout: child
                .stdout
                .take()
                .ok_or(SpawnError::MissingStream { stream: "stdout" })?,
            stderr: child
                .stderr
                .take()
                .ok_or(SpawnError::MissingStream { stream: "stderr" })?,
        })
    }

    /// OS process id, or `None` once the process has been reaped.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Ask the process to exit and reap it.
    ///
    /// On Unix the process gets SIGTERM and is killed if it is still alive
    /// after `grace`. Elsewhere it is killed right away.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be killed or reaped.
    pub async fn terminate(&mut self, grace: Duration) -> std::io::Result<ExitStatus> {
        #[cfg(unix)]
        self.signal_terminate();
        #[cfg(not(unix))]
        let grace = Duration::ZERO;

        if let Ok(status) = tokio::time::timeout(grace, self.child.wait()).await {
            return status;
        }
        tracing::debug!(pid = ?self.id(), "Server still running after grace period, killing");
        self.child.kill().await?;
        self.child.wait().await
    }

    #[cfg(unix)]
    fn signal_terminate(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.id().and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            tracing::debug!(pid, error = %e, "Failed to send SIGTERM");
        }
    }
}
