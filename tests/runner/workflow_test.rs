//! End-to-end runs against scripted servers.
#![cfg(unix)]

use async_trait::async_trait;
use context_runner::config::RunnerConfig;
use context_runner::connector::ConnectorState;
use context_runner::runner::{Analysis, AnalysisError, Analyzer, Runner, SummaryAnalyzer};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::support::{script_connector, within, TOOLS_SERVER};

fn config(commands: &[&str]) -> RunnerConfig {
    RunnerConfig {
        commands: commands.iter().map(ToString::to_string).collect(),
        shutdown_delay_secs: 0,
    }
}

#[tokio::test]
async fn run_collects_every_command() {
    let runner = Runner::new(config(&["list-tools", "describe-tool:get-library-docs"]), SummaryAnalyzer);
    let mut connector = script_connector(TOOLS_SERVER);

    let report = within(runner.run(&mut connector)).await.unwrap();

    assert!(report.is_success(), "error: {:?}", report.error);
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.analyses.len(), 2);
    assert_eq!(
        report.outcomes[0].tool_names(),
        Some(vec![
            "resolve-library-id".to_string(),
            "get-library-docs".to_string()
        ])
    );
    assert_eq!(
        report.outcomes[1].parsed,
        Some(serde_json::json!({"tool": "get-library-docs"}))
    );
    assert!(report.analyses.iter().all(|a| a.input_type == "object"));
    assert_eq!(connector.state(), ConnectorState::Closed);
}

#[tokio::test]
async fn non_json_response_is_kept_raw() {
    let runner = Runner::new(config(&["whatever"]), SummaryAnalyzer);
    let mut connector = script_connector(TOOLS_SERVER);

    let report = within(runner.run(&mut connector)).await.unwrap();

    assert!(report.is_success());
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.raw, "unknown:whatever");
    assert_eq!(outcome.parsed, None);
    assert_eq!(report.analyses[0].input_type, "string");
}

#[tokio::test]
async fn server_exit_is_reported() {
    let script = r#"
echo 'MCP Server ready'
IFS= read -r line
exit 2
"#;
    let runner = Runner::new(config(&["list-tools"]), SummaryAnalyzer);
    let mut connector = script_connector(script);

    let report = within(runner.run(&mut connector)).await.unwrap();

    assert!(!report.is_success());
    let error = report.error.as_deref().unwrap_or_default();
    assert!(error.contains("Connection closed"), "error: {error}");
    assert!(report.outcomes.is_empty());
    assert_eq!(report.exit_code, Some(2));
}

#[tokio::test]
async fn cancelled_run_still_stops_the_server() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let runner = Runner::new(config(&["list-tools"]), SummaryAnalyzer).with_cancellation(cancel);
    let mut connector = script_connector(TOOLS_SERVER);

    let report = within(runner.run(&mut connector)).await.unwrap();

    assert_eq!(report.error.as_deref(), Some("Run cancelled"));
    assert_eq!(connector.state(), ConnectorState::Closed);
}

struct RejectingAnalyzer;

#[async_trait]
impl Analyzer for RejectingAnalyzer {
    async fn analyze(&self, _input: &Value) -> Result<Analysis, AnalysisError> {
        Err(AnalysisError::Rejected("not today".to_string()))
    }
}

#[tokio::test]
async fn analyzer_failure_does_not_fail_the_run() {
    let runner = Runner::new(config(&["list-tools"]), RejectingAnalyzer);
    let mut connector = script_connector(TOOLS_SERVER);

    let report = within(runner.run(&mut connector)).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.analyses.is_empty());
}
