//! Connector tests against scripted servers.

mod correlation_test;

/// Verify the public connector types are exported from the library.
#[test]
fn test_connector_types_exported() {
    use context_runner::connector::{
        ConnectorError, ConnectorEvent, ConnectorState, ErrorKind, EventBroadcaster, EventKind,
        LineFramer, ReadinessGate, ResponseCorrelator, ServerCommand, DEFAULT_READY_MARKER,
    };

    let _ = LineFramer::new();
    let _: ReadinessGate<()> = ReadinessGate::new(DEFAULT_READY_MARKER);
    let _ = ResponseCorrelator::new();
    let _ = EventBroadcaster::new();
    let _ = ServerCommand::default();

    assert_eq!(ConnectorState::default(), ConnectorState::Idle);
    assert_eq!(ConnectorEvent::Ready.kind(), EventKind::Ready);
    assert_eq!(ConnectorError::NotRunning.kind(), ErrorKind::NotRunning);
}
