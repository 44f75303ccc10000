//! context-runner - drive a line-protocol context server over stdio.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use context_runner::config::{AppConfig, ConfigLoader};
use context_runner::connector::Connector;
use context_runner::display;
use context_runner::runner::{Runner, SummaryAnalyzer};

#[derive(Parser)]
#[command(
    name = "context-runner",
    about = "Query a context server over its stdio line protocol",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a config file (defaults to .context-runner.toml, then the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server, send commands, analyze responses, then stop.
    Run {
        /// Command to send; repeat for several. Replaces the configured list.
        #[arg(short = 'c', long = "command")]
        commands: Vec<String>,
        /// Seconds to keep the connection open after the last command.
        #[arg(long)]
        shutdown_delay: Option<u64>,
        /// Substring that marks the server as ready.
        #[arg(long)]
        ready_marker: Option<String>,
        /// Print responses without truncation.
        #[arg(long)]
        raw: bool,
    },
    /// Print the resolved configuration.
    Config,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig, ExitCode> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    loader.load().map_err(|e| {
        display::print_error(&e.to_string());
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match load_config(cli.config) {
        Ok(config) => config,
        Err(code) => return code,
    };

    match cli.command {
        Commands::Run {
            commands,
            shutdown_delay,
            ready_marker,
            raw,
        } => {
            if !commands.is_empty() {
                config.runner.commands = commands;
            }
            if let Some(secs) = shutdown_delay {
                config.runner.shutdown_delay_secs = secs;
            }
            if let Some(marker) = ready_marker {
                config.connector.ready_marker = marker;
            }
            run(config, raw).await
        }
        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                display::print_error(&e.to_string());
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(config: AppConfig, raw: bool) -> ExitCode {
    tracing::info!(
        program = %config.connector.program,
        commands = ?config.runner.commands,
        "Starting context runner"
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            ctrl_c.cancel();
        }
    });

    let mut connector = Connector::from_config(&config.connector);
    display::print_server_start(&config.connector.program, &config.connector.args);

    let runner = Runner::new(config.runner, SummaryAnalyzer).with_cancellation(cancel);
    match runner.run(&mut connector).await {
        Ok(report) => {
            display::print_report(&report, raw);
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            display::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
