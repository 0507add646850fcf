//! Command relay tests
//!
//! Commands submitted by the user are encoded and published through the
//! supervisor, or dropped (never queued) when the connection is down.


use pillbox_relay::protocol::Command;
use pillbox_relay::relay::{CommandRelay, CommandSubmitter, SubmitOutcome};
use pillbox_relay::testing::{MockTransport, TransportOp};
use pillbox_relay::transport::mqtt::ConnectionState;
use test_helpers::TestRelay;

#[tokio::test(start_paused = true)]
async fn test_commands_publish_exact_payloads() {
    // Arrange
    let relay = TestRelay::connected().await;
    let commands = CommandRelay::new(relay.supervisor.clone());

    // Act
    for command in [
        Command::SetLed { pin: 19, on: true },
        Command::SetLed { pin: 19, on: false },
        Command::SetPeriod {
            pin: 21,
            seconds: 60,
        },
        Command::Reset { pin: 22 },
    ] {
        assert_eq!(commands.submit(command).await, SubmitOutcome::Published);
    }

    // Assert
    let published = relay.transport.published().await;
    assert_eq!(
        published,
        vec![
            (
                "esp32/led/command".to_string(),
                br#"{"pin":19,"state":"ON"}"#.to_vec()
            ),
            (
                "esp32/led/command".to_string(),
                br#"{"pin":19,"state":"OFF"}"#.to_vec()
            ),
            (
                "esp32/period".to_string(),
                br#"{"pin":21,"period":60}"#.to_vec()
            ),
            ("esp32/reset".to_string(), b"22".to_vec()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_submit_while_disconnected_drops_command() {
    // Arrange
    let relay = TestRelay::new();
    let commands = CommandRelay::new(relay.supervisor.clone());

    // Act
    let outcome = commands.submit(Command::SetLed { pin: 19, on: true }).await;

    // Assert: no transport publish, nothing replayed after connecting
    assert_eq!(outcome, SubmitOutcome::Dropped);
    assert_eq!(relay.supervisor.start().await, ConnectionState::Connected);
    assert!(relay.transport.published().await.is_empty());
    assert!(!relay
        .transport
        .operations()
        .await
        .iter()
        .any(|op| matches!(op, TransportOp::Publish { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_submit_while_reconnect_pending_drops_command() {
    // Arrange
    let transport = MockTransport::new();
    transport.fail_next_connects(1);
    let relay = TestRelay::with_transport(transport);
    assert_eq!(
        relay.supervisor.start().await,
        ConnectionState::ReconnectPending
    );
    let commands = CommandRelay::new(relay.supervisor.clone());

    // Act
    let outcome = commands.submit(Command::Reset { pin: 4 }).await;

    // Assert
    assert_eq!(outcome, SubmitOutcome::Dropped);
    assert_eq!(commands.connection_status(), ConnectionState::ReconnectPending);
    assert!(relay.transport.published().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transport_publish_failure_drops_command() {
    let relay = TestRelay::connected().await;
    relay.transport.set_publish_failure(true);
    let commands = CommandRelay::new(relay.supervisor.clone());

    let outcome = commands
        .submit(Command::SetPeriod {
            pin: 19,
            seconds: 3600,
        })
        .await;

    assert_eq!(outcome, SubmitOutcome::Dropped);
    assert_eq!(commands.connection_status(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_submit_after_supervisor_stopped_drops_command() {
    let relay = TestRelay::connected().await;
    let commands = CommandRelay::new(relay.supervisor.clone());
    relay.supervisor.stop().await;

    let outcome = commands.submit(Command::SetLed { pin: 5, on: true }).await;

    assert_eq!(outcome, SubmitOutcome::Dropped);
    assert!(relay.transport.published().await.is_empty());
}
