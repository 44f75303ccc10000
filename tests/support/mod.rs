//! Shared helpers for integration tests.

use std::future::Future;
use std::time::Duration;

use context_runner::connector::{Connector, ConnectorEvent, ServerCommand};
use tokio::sync::broadcast;

/// Upper bound for any single test step.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Prints the readiness marker, then answers every line with `reply:<line>`.
pub const ECHO_SERVER: &str = r#"
echo 'MCP Server ready'
while IFS= read -r line; do
  echo "reply:$line"
done
"#;

/// Understands `list-tools` and `describe-tool:<name>`.
pub const TOOLS_SERVER: &str = r#"
echo 'booting'
echo 'MCP Server ready'
while IFS= read -r line; do
  case "$line" in
    list-tools) echo '{"tools":["resolve-library-id","get-library-docs"]}' ;;
    describe-tool:*) echo "{\"tool\":\"${line#describe-tool:}\"}" ;;
    *) echo "unknown:$line" ;;
  esac
done
"#;

/// Build a connector that runs `script` under `sh -c`.
pub fn script_connector(script: &str) -> Connector {
    Connector::new(script_command(script)).with_terminate_timeout(Duration::from_secs(2))
}

pub fn script_command(script: &str) -> ServerCommand {
    ServerCommand::new("sh").args(["-c", script])
}

/// Await `future`, failing the test if it takes too long.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(STEP_TIMEOUT, future)
        .await
        .expect("test step timed out")
}

/// Receive events until the close event, returning everything seen.
pub async fn collect_until_close(rx: &mut broadcast::Receiver<ConnectorEvent>) -> Vec<ConnectorEvent> {
    within(async {
        let mut seen = Vec::new();
        while let Ok(event) = rx.recv().await {
            let done = matches!(event, ConnectorEvent::Close { .. });
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    })
    .await
}
