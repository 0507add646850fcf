//! Transport layer between the relay and the MQTT broker
//!
//! This module provides the transport abstraction the connection supervisor
//! drives, and the `rumqttc`-backed implementation used in production.

use crate::protocol::{InboundEvent, QualityLevel};
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::connection::ConnectOptions;

/// Events a live transport session reports back to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A message arrived on a subscribed topic
    Message(InboundEvent),
    /// The session ended; no further events follow on this channel
    ConnectionLost(String),
}

/// Transport trait for broker communication
///
/// This trait provides an abstraction over the MQTT client library to enable
/// dependency injection and testing. The transport performs no retries of its
/// own; reconnect policy belongs to the supervisor.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a session and wait for the broker acknowledgement
    ///
    /// On success returns the event stream for this session. Any previous
    /// session is closed first.
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<mpsc::Receiver<TransportEvent>, Self::Error>;

    /// Subscribe to a topic filter on the current session
    async fn subscribe(&self, topic: &str, qos: QualityLevel) -> Result<(), Self::Error>;

    /// Publish a non-retained message on the current session
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QualityLevel,
    ) -> Result<(), Self::Error>;

    /// Close the current session; succeeds when there is none
    async fn disconnect(&self) -> Result<(), Self::Error>;
}

/// Type alias for the production transport
pub type MqttTransport = mqtt::MqttClient;

/// Render an error and its source chain as one line
pub fn describe_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut description = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        description.push_str(": ");
        description.push_str(&cause.to_string());
        source = cause.source();
    }
    description
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mqtt::MqttError;

    #[test]
    fn test_describe_error_includes_source_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error = MqttError::ConnectionFailed(Box::new(io_error));
        assert_eq!(describe_error(&error), "Connection failed: refused");
    }

    #[test]
    fn test_describe_error_without_source() {
        let error = MqttError::NoSession;
        assert_eq!(describe_error(&error), "Transport has no open session");
    }
}
