//! Mock implementations for testing
//!
//! Provides a scriptable transport, a recording notification sink and a
//! recording command submitter so the relay can be exercised without a
//! broker.

use crate::protocol::{Command, InboundEvent, QualityLevel};
use crate::relay::{CommandSubmitter, Notification, NotificationSink, SubmitOutcome};
use crate::transport::mqtt::MqttError;
use crate::transport::{ConnectOptions, Transport, TransportEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One call made against the mock transport, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    Connect { client_id: String },
    Subscribe { topic: String, qos: QualityLevel },
    Publish { topic: String, payload: Vec<u8> },
    Disconnect,
}

pub type PublishedMessage = (String, Vec<u8>);

/// Mock transport for testing
///
/// Clones share state, so a test can keep a handle after moving the
/// transport into a supervisor.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    pub operations: Arc<Mutex<Vec<TransportOp>>>,
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub failing_subscriptions: Arc<Mutex<Vec<String>>>,
    connect_failures_remaining: Arc<AtomicU32>,
    hang_on_connect: Arc<AtomicBool>,
    pub should_fail_publish: Arc<AtomicBool>,
    session: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` connect attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.connect_failures_remaining
            .store(count, Ordering::SeqCst);
    }

    /// Make connect attempts never complete (until cleared)
    pub fn set_hang_on_connect(&self, hang: bool) {
        self.hang_on_connect.store(hang, Ordering::SeqCst);
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.should_fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Reject subscriptions to this topic
    pub async fn fail_subscription(&self, topic: &str) {
        self.failing_subscriptions
            .lock()
            .await
            .push(topic.to_string());
    }

    pub async fn operations(&self) -> Vec<TransportOp> {
        self.operations.lock().await.clone()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    /// Topics subscribed so far, in call order
    pub async fn subscriptions(&self) -> Vec<String> {
        self.operations
            .lock()
            .await
            .iter()
            .filter_map(|op| match op {
                TransportOp::Subscribe { topic, .. } => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn connect_count(&self) -> usize {
        self.count_ops(|op| matches!(op, TransportOp::Connect { .. }))
            .await
    }

    pub async fn disconnect_count(&self) -> usize {
        self.count_ops(|op| matches!(op, TransportOp::Disconnect))
            .await
    }

    async fn count_ops(&self, predicate: impl Fn(&TransportOp) -> bool) -> usize {
        self.operations
            .lock()
            .await
            .iter()
            .filter(|op| predicate(op))
            .count()
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Deliver an inbound message on the open session
    ///
    /// Returns false when there is no session or its receiver is gone.
    pub async fn inject_message(&self, topic: &str, payload: impl Into<bytes::Bytes>) -> bool {
        let sender = self.session.lock().await.clone();
        match sender {
            Some(sender) => sender
                .send(TransportEvent::Message(InboundEvent::new(topic, payload)))
                .await
                .is_ok(),
            None => false,
        }
    }

    /// End the open session as if the network dropped
    pub async fn drop_connection(&self, reason: &str) -> bool {
        let sender = self.session.lock().await.take();
        match sender {
            Some(sender) => sender
                .send(TransportEvent::ConnectionLost(reason.to_string()))
                .await
                .is_ok(),
            None => false,
        }
    }

    pub async fn clear_history(&self) {
        self.operations.lock().await.clear();
        self.published_messages.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<mpsc::Receiver<TransportEvent>, Self::Error> {
        self.operations.lock().await.push(TransportOp::Connect {
            client_id: options.client_id.clone(),
        });

        if self.hang_on_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let remaining = self.connect_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(MqttError::ConnectionFailed(Box::from(
                "mock broker refused connection",
            )));
        }

        let (sender, receiver) = mpsc::channel(64);
        *self.session.lock().await = Some(sender);
        Ok(receiver)
    }

    async fn subscribe(&self, topic: &str, qos: QualityLevel) -> Result<(), Self::Error> {
        if self.session.lock().await.is_none() {
            return Err(MqttError::NoSession);
        }

        self.operations.lock().await.push(TransportOp::Subscribe {
            topic: topic.to_string(),
            qos,
        });

        if self
            .failing_subscriptions
            .lock()
            .await
            .iter()
            .any(|t| t == topic)
        {
            return Err(MqttError::SubscriptionFailed(
                format!("mock broker rejected {topic}").into(),
            ));
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: QualityLevel,
    ) -> Result<(), Self::Error> {
        if self.session.lock().await.is_none() {
            return Err(MqttError::NoSession);
        }

        self.operations.lock().await.push(TransportOp::Publish {
            topic: topic.to_string(),
            payload: payload.clone(),
        });

        if self.should_fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed("mock publish failure".into()));
        }

        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.operations.lock().await.push(TransportOp::Disconnect);
        self.session.lock().await.take();
        Ok(())
    }
}

/// Notification sink that remembers every call
#[derive(Debug, Clone, Default)]
pub struct RecordingNotificationSink {
    pub notifications: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, notification: &Notification) {
        self.notifications.lock().await.push(notification.clone());
    }
}

/// Command submitter that records commands instead of publishing them
#[derive(Debug, Clone)]
pub struct RecordingCommandSubmitter {
    pub commands: Arc<Mutex<Vec<Command>>>,
    outcome: SubmitOutcome,
}

impl Default for RecordingCommandSubmitter {
    fn default() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            outcome: SubmitOutcome::Published,
        }
    }
}

impl RecordingCommandSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A submitter that records but reports every command as dropped
    pub fn dropping() -> Self {
        Self {
            outcome: SubmitOutcome::Dropped,
            ..Self::default()
        }
    }

    pub async fn commands(&self) -> Vec<Command> {
        self.commands.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.commands.lock().await.clear();
    }
}

#[async_trait]
impl CommandSubmitter for RecordingCommandSubmitter {
    async fn submit(&self, command: Command) -> SubmitOutcome {
        self.commands.lock().await.push(command);
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mqtt::connection::BrokerAddress;
    use std::time::Duration;

    fn options() -> ConnectOptions {
        ConnectOptions {
            broker: BrokerAddress {
                host: "localhost".to_string(),
                port: 1883,
            },
            client_id: "mock-client".to_string(),
            credentials: None,
            clean_session: false,
            keep_alive: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_scripted_connect_failure_is_connection_failed() {
        let transport = MockTransport::new();
        transport.fail_next_connects(1);

        match transport.connect(&options()).await {
            Err(error @ MqttError::ConnectionFailed(_)) => assert_eq!(
                crate::transport::describe_error(&error),
                "Connection failed: mock broker refused connection"
            ),
            other => panic!("Expected ConnectionFailed, got {:?}", other.map(|_| ())),
        }
        assert!(transport.connect(&options()).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_transport_records_operations_in_order() {
        let transport = MockTransport::new();

        let _events = transport.connect(&options()).await.unwrap();
        transport
            .subscribe("esp32/startup", QualityLevel::AtLeastOnce)
            .await
            .unwrap();
        transport
            .publish("esp32/reset", b"19".to_vec(), QualityLevel::AtLeastOnce)
            .await
            .unwrap();
        transport.disconnect().await.unwrap();

        let operations = transport.operations().await;
        assert_eq!(operations.len(), 4);
        assert!(matches!(operations[0], TransportOp::Connect { .. }));
        assert!(matches!(operations[3], TransportOp::Disconnect));
        assert_eq!(
            transport.published().await,
            vec![("esp32/reset".to_string(), b"19".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_mock_transport_connect_failures() {
        let transport = MockTransport::new();
        transport.fail_next_connects(2);

        assert!(transport.connect(&options()).await.is_err());
        assert!(transport.connect(&options()).await.is_err());
        assert!(transport.connect(&options()).await.is_ok());
        assert_eq!(transport.connect_count().await, 3);
    }

    #[tokio::test]
    async fn test_mock_transport_inject_and_drop() {
        let transport = MockTransport::new();
        let mut events = transport.connect(&options()).await.unwrap();

        assert!(transport.inject_message("esp32/startup", "hello").await);
        assert!(transport.drop_connection("gone").await);
        assert!(!transport.inject_message("esp32/startup", "late").await);

        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Message(_))
        ));
        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::ConnectionLost(_))
        ));
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_without_session_fails() {
        let transport = MockTransport::new();
        let result = transport
            .publish("esp32/reset", b"1".to_vec(), QualityLevel::AtLeastOnce)
            .await;
        assert!(matches!(result, Err(MqttError::NoSession)));
        assert!(transport.operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_recording_submitter() {
        let submitter = RecordingCommandSubmitter::dropping();
        let outcome = submitter.submit(Command::Reset { pin: 3 }).await;
        assert_eq!(outcome, SubmitOutcome::Dropped);
        assert_eq!(submitter.commands().await, vec![Command::Reset { pin: 3 }]);
    }
}
