//! Scripted run against a connector.
//!
//! Start the server, wait for it to become ready, send the configured
//! commands one after another, analyze each result, and stop the server
//! after a fixed delay.

use tokio_util::sync::CancellationToken;

use super::{Analyzer, CommandOutcome, RunReport};
use crate::config::RunnerConfig;
use crate::connector::{Connector, ConnectorError, ConnectorEvent, EventKind};

/// One-shot workflow driver.
pub struct Runner<A> {
    config: RunnerConfig,
    analyzer: A,
    cancel: CancellationToken,
}

impl<A: Analyzer> Runner<A> {
    #[must_use]
    pub fn new(config: RunnerConfig, analyzer: A) -> Self {
        Self {
            config,
            analyzer,
            cancel: CancellationToken::new(),
        }
    }

    /// Use a token that aborts the command phase and cuts the shutdown
    /// delay short when cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the workflow on an idle connector.
    ///
    /// Failures after the server started are recorded in the report and
    /// the connector is still stopped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the connector could not be started.
    pub async fn run(&self, connector: &mut Connector) -> Result<RunReport, ConnectorError> {
        connector.on(EventKind::Message, |event| {
            if let ConnectorEvent::Message(line) = event {
                tracing::info!(message = %line, "Server message");
            }
            Ok(())
        });

        connector.start()?;

        let mut report = RunReport::default();
        let result = tokio::select! {
            result = self.execute(connector, &mut report) => result.map_err(|e| e.to_string()),
            () = self.cancel.cancelled() => Err("Run cancelled".to_string()),
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Run failed");
            report.error = Some(e);
        }

        self.shutdown(connector).await;
        report.exit_code = connector.exit_code();
        Ok(report)
    }

    async fn execute(
        &self,
        connector: &Connector,
        report: &mut RunReport,
    ) -> Result<(), ConnectorError> {
        connector.wait_ready().await?;
        tracing::info!("Server ready");

        for command in &self.config.commands {
            let raw = connector.send_command(command.as_str()).await?;
            tracing::info!(command = %command, response = %raw, "Received response");

            let outcome = CommandOutcome::interpret(command.as_str(), raw);
            if let Some(tools) = outcome.tool_names() {
                tracing::info!(tools = %tools.join(", "), "Available tools");
            }

            match self.analyzer.analyze(&outcome.payload()).await {
                Ok(analysis) => {
                    tracing::info!(command = %command, summary = %analysis.summary, "Analysis complete");
                    report.analyses.push(analysis);
                }
                Err(e) => tracing::warn!(command = %command, error = %e, "Analysis failed"),
            }
            report.outcomes.push(outcome);
        }
        Ok(())
    }

    async fn shutdown(&self, connector: &mut Connector) {
        let delay = self.config.shutdown_delay();
        tracing::debug!(?delay, "Waiting before shutdown");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = self.cancel.cancelled() => tracing::info!("Shutdown delay cancelled"),
            () = connector.closed() => tracing::debug!("Server closed before shutdown delay elapsed"),
        }
        connector.stop().await;
        tracing::info!(exit_code = ?connector.exit_code(), "Server connection stopped");
    }
}
