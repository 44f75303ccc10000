//! Response correlation and message routing.
#![cfg(unix)]

use context_runner::connector::{ConnectorEvent, ConnectorState};
use tokio_stream::StreamExt;

use crate::support::{collect_until_close, script_connector, within, ECHO_SERVER, TOOLS_SERVER};

#[tokio::test]
async fn list_tools_then_describe_tool_resolve_in_order() {
    let mut connector = script_connector(TOOLS_SERVER);
    connector.start().unwrap();
    within(connector.wait_ready()).await.unwrap();

    let tools = within(connector.send_command("list-tools")).await.unwrap();
    let described = within(connector.send_command("describe-tool:X")).await.unwrap();

    assert_eq!(tools, r#"{"tools":["resolve-library-id","get-library-docs"]}"#);
    assert_eq!(described, r#"{"tool":"X"}"#);

    connector.stop().await;
}

#[tokio::test]
async fn output_before_marker_is_published_as_message() {
    let mut connector = script_connector(TOOLS_SERVER);
    let mut rx = connector.subscribe();
    connector.start().unwrap();

    assert_eq!(
        within(rx.recv()).await.unwrap(),
        ConnectorEvent::Message("booting".to_string())
    );
    assert_eq!(within(rx.recv()).await.unwrap(), ConnectorEvent::Ready);

    connector.stop().await;
}

#[tokio::test]
async fn concurrent_commands_are_not_swapped() {
    let mut connector = script_connector(TOOLS_SERVER);
    connector.start().unwrap();

    let tools = connector.submit("list-tools").unwrap();
    let described = connector.submit("describe-tool:X").unwrap();
    assert_eq!(described.command(), "describe-tool:X");

    assert_eq!(
        within(tools.wait()).await.unwrap(),
        r#"{"tools":["resolve-library-id","get-library-docs"]}"#
    );
    assert_eq!(within(described.wait()).await.unwrap(), r#"{"tool":"X"}"#);

    connector.stop().await;
}

/// Server that reads `n` lines before answering any of them.
fn batching_server(n: usize) -> String {
    format!(
        r#"
echo 'MCP Server ready'
set --
while [ "$#" -lt {n} ]; do
  IFS= read -r line || exit 1
  set -- "$@" "$line"
done
for line in "$@"; do
  echo "ack:$line"
done
cat > /dev/null
"#
    )
}

#[tokio::test]
async fn fifo_correlation_for_batches() {
    for n in [1, 2, 5] {
        let mut connector = script_connector(&batching_server(n));
        connector.start().unwrap();
        within(connector.wait_ready()).await.unwrap();

        let pending: Vec<_> = (0..n)
            .map(|i| connector.submit(format!("cmd-{i}")).unwrap())
            .collect();

        for (i, response) in pending.into_iter().enumerate() {
            let line = within(response.wait()).await.unwrap();
            assert_eq!(line, format!("ack:cmd-{i}"), "batch of {n}");
        }

        connector.stop().await;
    }
}

#[tokio::test]
async fn commands_sent_before_ready_are_held_until_marker() {
    let script = r#"
sleep 0.3
echo 'MCP Server ready'
while IFS= read -r line; do
  echo "reply:$line"
done
"#;
    let mut connector = script_connector(script);
    connector.start().unwrap();
    assert_eq!(connector.state(), ConnectorState::AwaitingReady);

    let response = within(connector.send_command("early")).await.unwrap();
    assert_eq!(response, "reply:early");
    assert_eq!(connector.state(), ConnectorState::Ready);

    connector.stop().await;
}

#[tokio::test]
async fn marker_is_consumed_once_and_then_treated_as_message() {
    let script = r#"
echo 'MCP Server ready'
echo 'MCP Server ready'
echo 'notice'
"#;
    let mut connector = script_connector(script);
    let mut rx = connector.subscribe();
    connector.start().unwrap();

    let events = collect_until_close(&mut rx).await;
    assert_eq!(events.len(), 4, "events: {events:?}");
    assert_eq!(events[0], ConnectorEvent::Ready);
    assert_eq!(
        events[1],
        ConnectorEvent::Message("MCP Server ready".to_string())
    );
    assert_eq!(events[2], ConnectorEvent::Message("notice".to_string()));
    match &events[3] {
        ConnectorEvent::Close { exit_code, stats } => {
            assert_eq!(*exit_code, Some(0));
            assert_eq!(stats.lines_received, 3);
            assert_eq!(stats.unsolicited_messages, 2);
            assert_eq!(stats.responses_correlated, 0);
        }
        other => panic!("Expected Close, got {other:?}"),
    }

    connector.stop().await;
}

#[tokio::test]
async fn repeated_marker_can_be_a_response() {
    let script = r#"
echo 'MCP Server ready'
IFS= read -r line
echo 'MCP Server ready'
cat > /dev/null
"#;
    let mut connector = script_connector(script);
    connector.start().unwrap();

    let response = within(connector.send_command("again")).await.unwrap();
    assert_eq!(response, "MCP Server ready");

    connector.stop().await;
}

#[tokio::test]
async fn line_without_pending_request_is_published() {
    let script = r#"
echo 'MCP Server ready'
IFS= read -r line
echo "reply:$line"
echo 'unsolicited tail'
cat > /dev/null
"#;
    let mut connector = script_connector(script);
    let mut events = Box::pin(connector.event_stream());
    connector.start().unwrap();

    let response = within(connector.send_command("x")).await.unwrap();
    assert_eq!(response, "reply:x");

    let message = within(async {
        while let Some(event) = events.next().await {
            if let ConnectorEvent::Message(line) = event {
                return Some(line);
            }
        }
        None
    })
    .await;
    assert_eq!(message.as_deref(), Some("unsolicited tail"));

    connector.stop().await;
}

#[tokio::test]
async fn stderr_output_is_not_correlated() {
    let script = r#"
echo 'warming up' >&2
echo 'MCP Server ready'
while IFS= read -r line; do
  echo "diagnostic for $line" >&2
  echo "reply:$line"
done
"#;
    let mut connector = script_connector(script);
    connector.start().unwrap();

    assert_eq!(
        within(connector.send_command("one")).await.unwrap(),
        "reply:one"
    );
    assert_eq!(
        within(connector.send_command("two")).await.unwrap(),
        "reply:two"
    );

    connector.stop().await;
}

#[tokio::test]
async fn listener_registered_after_start_receives_messages() {
    use std::sync::{Arc, Mutex};

    let mut connector = script_connector(ECHO_SERVER);
    connector.start().unwrap();
    within(connector.wait_ready()).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    connector.on(context_runner::connector::EventKind::Close, move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });

    assert_eq!(
        within(connector.send_command("ping")).await.unwrap(),
        "reply:ping"
    );
    connector.stop().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0], ConnectorEvent::Close { .. }));
}
