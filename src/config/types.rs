//! Configuration types.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connector::{platform_program, ServerCommand, DEFAULT_READY_MARKER, DEFAULT_SERVER_PACKAGE};

/// How to launch and talk to the server process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Executable to run. Defaults to `npx` (`npx.cmd` on Windows).
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments passed to the executable.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Working directory for the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Substring that marks the server as ready.
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,
    /// Seconds to wait after SIGTERM before killing the server.
    #[serde(default = "default_terminate_timeout_secs")]
    pub terminate_timeout_secs: u64,
    /// Optional per-command response timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    /// Extra environment variables for the server.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

fn default_program() -> String {
    platform_program().to_string()
}

fn default_args() -> Vec<String> {
    vec!["-y".to_string(), DEFAULT_SERVER_PACKAGE.to_string()]
}

fn default_ready_marker() -> String {
    DEFAULT_READY_MARKER.to_string()
}

fn default_terminate_timeout_secs() -> u64 {
    5
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: None,
            env: HashMap::new(),
            ready_marker: default_ready_marker(),
            terminate_timeout_secs: default_terminate_timeout_secs(),
            request_timeout_secs: None,
        }
    }
}

impl ConnectorConfig {
    /// Build the server command line.
    #[must_use]
    pub fn server_command(&self) -> ServerCommand {
        let mut command = ServerCommand::new(self.program.clone()).args(self.args.iter().cloned());
        if let Some(dir) = &self.working_dir {
            command = command.working_dir(dir);
        }
        for (key, value) in &self.env {
            command = command.env(key, value);
        }
        command
    }

    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// What the runner does once the server is up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Commands sent in order, each after the previous response.
    #[serde(default = "default_commands")]
    pub commands: Vec<String>,
    /// Seconds to keep the connection open before stopping.
    #[serde(default = "default_shutdown_delay_secs")]
    pub shutdown_delay_secs: u64,
}

fn default_commands() -> Vec<String> {
    vec!["list-tools".to_string()]
}

fn default_shutdown_delay_secs() -> u64 {
    30
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            commands: default_commands(),
            shutdown_delay_secs: default_shutdown_delay_secs(),
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_secs(self.shutdown_delay_secs)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}
