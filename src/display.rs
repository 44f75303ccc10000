//! Colored CLI display utilities for run output.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::runner::{Analysis, CommandOutcome, RunReport};

/// Timestamp matching the tracing output format.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length for truncated response lines.
const RESPONSE_MAX_LEN: usize = 160;

/// Truncate a string to a maximum number of characters, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

/// Print that a server was started.
pub fn print_server_start(program: &str, args: &[String]) {
    println!(
        "{} {} {} {}",
        timestamp().dimmed(),
        "[SERVER]".blue().bold(),
        program.cyan(),
        args.join(" ").dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print one command and its response.
pub fn print_outcome(outcome: &CommandOutcome, raw_mode: bool) {
    let tag = if outcome.parsed.is_some() {
        "[RESPONSE]".green().bold().to_string()
    } else {
        "[RAW]".yellow().bold().to_string()
    };
    println!(
        "{} {} {} -> {}",
        timestamp().dimmed(),
        tag,
        outcome.command.bold(),
        truncate(&outcome.raw, RESPONSE_MAX_LEN, raw_mode)
    );
    if let Some(tools) = outcome.tool_names() {
        println!("{} {}", "[TOOLS]".cyan().bold(), tools.join(", "));
    }
    let _ = io::stdout().flush();
}

/// Print an analysis result.
pub fn print_analysis(analysis: &Analysis) {
    println!(
        "{} {} ({}) {}",
        "[ANALYSIS]".magenta().bold(),
        analysis.summary,
        analysis.input_type.dimmed(),
        analysis.timestamp.to_rfc3339().dimmed()
    );
    for recommendation in &analysis.recommendations {
        println!("  - {recommendation}");
    }
    let _ = io::stdout().flush();
}

/// Print a full run report.
pub fn print_report(report: &RunReport, raw_mode: bool) {
    for outcome in &report.outcomes {
        print_outcome(outcome, raw_mode);
    }
    for analysis in &report.analyses {
        print_analysis(analysis);
    }
    if let Some(error) = &report.error {
        print_error(error);
    }
    println!(
        "{} {} Connection closed (exit code: {})",
        timestamp().dimmed(),
        "[SERVER]".blue().bold(),
        exit_label(report.exit_code)
    );
    let _ = io::stdout().flush();
}

fn exit_label(exit_code: Option<i32>) -> String {
    exit_code.map_or_else(|| "none".to_string(), |code| code.to_string())
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}
