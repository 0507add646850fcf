//! Connection supervisor
//!
//! A single task owns the broker connection state and serializes every
//! transition: host lifecycle calls, connect outcomes, transport events and
//! reconnect timer expiry all arrive as messages on one channel. Connect
//! attempts and reconnect timers run on their own tasks and report back, so
//! the supervisor stays responsive (a publish while `Connecting` fails fast).
//!
//! Stale completions are discarded by comparing an epoch counter that is
//! bumped on every connect attempt and on every stop.

use super::notification::NotificationSink;
use super::router::{RouteAction, TopicRouter};
use crate::config::MqttSection;
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::protocol::{validate_publish_topic, QualityLevel, SUBSCRIPTIONS};
use crate::transport::mqtt::{
    ConnectOptions, ConnectionCounters, ConnectionEvent, ConnectionState, HealthMetrics,
    HealthMonitor, MqttError, ReconnectConfig, ReconnectionDecision,
};
use crate::transport::{describe_error, Transport, TransportEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Everything the supervisor needs to connect and reconnect
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub options: ConnectOptions,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl SupervisorSettings {
    /// Resolve settings from the `[mqtt]` section
    pub fn from_config(config: &MqttSection) -> Result<Self, MqttError> {
        Ok(Self {
            options: ConnectOptions::from_config(config)?,
            connect_timeout: config.connect_timeout(),
            reconnect: ReconnectConfig::constant(config.reconnect_delay()),
        })
    }
}

type ConnectResult = Result<mpsc::Receiver<TransportEvent>, String>;

enum SupervisorMessage {
    Start {
        reply: oneshot::Sender<ConnectionState>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QualityLevel,
        reply: oneshot::Sender<RelayResult<()>>,
    },
    ConnectionLost {
        reason: String,
    },
    ConnectOutcome {
        epoch: u64,
        result: ConnectResult,
    },
    ReconnectTimerFired {
        epoch: u64,
    },
    Health {
        reply: oneshot::Sender<HealthMetrics>,
    },
}

/// Handle to the connection supervisor task
///
/// Cloning the handle is cheap; all clones talk to the same supervisor. The
/// supervisor task shuts down (closing any open session) once every handle
/// has been dropped.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    commands: mpsc::UnboundedSender<SupervisorMessage>,
    status: watch::Receiver<ConnectionState>,
    client_id: Arc<str>,
}

impl ConnectionSupervisor {
    /// Spawn the supervisor task on the current tokio runtime
    ///
    /// The supervisor starts in `Disconnected`; call [`start`](Self::start)
    /// to connect.
    pub fn spawn<T: Transport>(
        transport: T,
        settings: SupervisorSettings,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionState::Disconnected);
        let client_id: Arc<str> = Arc::from(settings.options.client_id.as_str());

        let actor = SupervisorActor {
            transport: Arc::new(transport),
            settings,
            router: TopicRouter::new(),
            sink,
            state: ConnectionState::Disconnected,
            status_tx,
            self_tx: commands_tx.downgrade(),
            epoch: 0,
            inbound: None,
            reconnect_timer: None,
            connect_task: None,
            start_waiters: Vec::new(),
            counters: ConnectionCounters::default(),
            failed_attempts: 0,
        };

        let span = crate::lifecycle_span!(component = "supervisor", client_id = %client_id);
        tokio::spawn(actor.run(commands_rx).instrument(span));

        Self {
            commands: commands_tx,
            status: status_rx,
            client_id,
        }
    }

    /// Connect if not already connected or connecting
    ///
    /// Resolves once the attempt this call started (or joined) has finished,
    /// returning the resulting state: `Connected` on success,
    /// `ReconnectPending` on failure. Calling `start` while connected is a
    /// no-op; calling it while a reconnect is pending connects immediately.
    pub async fn start(&self) -> ConnectionState {
        let (reply, response) = oneshot::channel();
        if self.commands.send(SupervisorMessage::Start { reply }).is_err() {
            return ConnectionState::Disconnected;
        }
        response.await.unwrap_or(ConnectionState::Disconnected)
    }

    /// Cancel any pending reconnect and close the connection
    ///
    /// Idempotent, and safe to call when the supervisor task is already gone.
    pub async fn stop(&self) {
        let (reply, response) = oneshot::channel();
        if self.commands.send(SupervisorMessage::Stop { reply }).is_ok() {
            let _ = response.await;
        }
    }

    /// Publish a non-retained message if connected
    ///
    /// Fails with [`RelayError::NotConnected`] in any state other than
    /// `Connected`; nothing is queued.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QualityLevel,
    ) -> RelayResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SupervisorMessage::Publish {
                topic: topic.to_string(),
                payload,
                qos,
                reply,
            })
            .map_err(|_| RelayError::SupervisorStopped)?;
        response.await.map_err(|_| RelayError::SupervisorStopped)?
    }

    /// Current connection state
    pub fn connection_status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    /// Subscribe to connection state changes
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// Wait until the supervisor reaches `target`, up to `timeout`
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut status = self.status.clone();
        tokio::time::timeout(timeout, status.wait_for(|state| *state == target))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Host hook: the platform observed a network loss
    ///
    /// Treated exactly like a transport-reported loss. Ignored unless the
    /// supervisor is `Connected`.
    pub fn report_connection_lost(&self, reason: impl Into<String>) {
        let _ = self.commands.send(SupervisorMessage::ConnectionLost {
            reason: reason.into(),
        });
    }

    /// Connection health as seen by the supervisor
    pub async fn health_metrics(&self) -> RelayResult<HealthMetrics> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SupervisorMessage::Health { reply })
            .map_err(|_| RelayError::SupervisorStopped)?;
        response.await.map_err(|_| RelayError::SupervisorStopped)
    }

    /// Client identifier used for every connect of this supervisor
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

struct SupervisorActor<T: Transport> {
    transport: Arc<T>,
    settings: SupervisorSettings,
    router: TopicRouter,
    sink: Arc<dyn NotificationSink>,
    state: ConnectionState,
    status_tx: watch::Sender<ConnectionState>,
    self_tx: mpsc::WeakUnboundedSender<SupervisorMessage>,
    epoch: u64,
    inbound: Option<mpsc::Receiver<TransportEvent>>,
    reconnect_timer: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,
    start_waiters: Vec<oneshot::Sender<ConnectionState>>,
    counters: ConnectionCounters,
    failed_attempts: u32,
}

async fn next_transport_event(
    inbound: &mut Option<mpsc::Receiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match inbound {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

impl<T: Transport> SupervisorActor<T> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SupervisorMessage>) {
        debug!("Connection supervisor started");

        loop {
            tokio::select! {
                message = commands.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },
                event = next_transport_event(&mut self.inbound) => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => {
                        self.handle_connection_lost("transport event stream closed".to_string())
                            .await
                    }
                },
            }
        }

        self.handle_stop().await;
        debug!("Connection supervisor stopped");
    }

    async fn handle_message(&mut self, message: SupervisorMessage) {
        match message {
            SupervisorMessage::Start { reply } => self.handle_start(reply),
            SupervisorMessage::Stop { reply } => {
                self.handle_stop().await;
                let _ = reply.send(());
            }
            SupervisorMessage::Publish {
                topic,
                payload,
                qos,
                reply,
            } => {
                let result = self.handle_publish(&topic, payload, qos).await;
                let _ = reply.send(result);
            }
            SupervisorMessage::ConnectionLost { reason } => {
                self.handle_connection_lost(reason).await
            }
            SupervisorMessage::ConnectOutcome { epoch, result } => {
                self.handle_connect_outcome(epoch, result).await
            }
            SupervisorMessage::ReconnectTimerFired { epoch } => self.handle_reconnect_timer(epoch),
            SupervisorMessage::Health { reply } => {
                let _ = reply.send(HealthMonitor::calculate_health_metrics(
                    self.state,
                    &self.counters,
                ));
            }
        }
    }

    fn transition(&mut self, next: ConnectionState, reason: Option<&str>) {
        let previous = self.state;
        if previous == next {
            return;
        }
        HealthMonitor::log_state_transition(previous, next, reason);
        self.state = next;
        metrics().set_connection_status(next.as_str());
        self.status_tx.send_replace(next);
    }

    fn apply(&mut self, event: ConnectionEvent) -> bool {
        match HealthMonitor::determine_next_state(self.state, &event) {
            Some(next) => {
                let reason = match &event {
                    ConnectionEvent::ConnectFailed(reason) | ConnectionEvent::ConnectionLost(reason) => {
                        Some(reason.as_str())
                    }
                    _ => None,
                };
                self.transition(next, reason);
                true
            }
            None => false,
        }
    }

    fn handle_start(&mut self, reply: oneshot::Sender<ConnectionState>) {
        if self.apply(ConnectionEvent::StartRequested) {
            self.cancel_reconnect_timer();
            self.start_waiters.push(reply);
            self.begin_connect();
        } else if self.state == ConnectionState::Connecting {
            debug!("Start joined the attempt already in flight");
            self.start_waiters.push(reply);
        } else {
            debug!(state = %self.state, "Start ignored");
            let _ = reply.send(self.state);
        }
    }

    fn begin_connect(&mut self) {
        let Some(events) = self.self_tx.upgrade() else {
            return;
        };

        self.epoch += 1;
        let epoch = self.epoch;
        let transport = Arc::clone(&self.transport);
        let options = self.settings.options.clone();
        let timeout = self.settings.connect_timeout;

        metrics().mqtt_connection_attempt();
        let span = crate::mqtt_span!(operation = "connect", epoch);
        self.connect_task = Some(tokio::spawn(
            async move {
                let result = match tokio::time::timeout(timeout, transport.connect(&options)).await
                {
                    Ok(Ok(receiver)) => Ok(receiver),
                    Ok(Err(e)) => Err(describe_error(&e)),
                    Err(_) => Err(format!("connect timed out after {timeout:?}")),
                };
                let _ = events.send(SupervisorMessage::ConnectOutcome { epoch, result });
            }
            .instrument(span),
        ));
    }

    async fn handle_connect_outcome(&mut self, epoch: u64, result: ConnectResult) {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            debug!(epoch, current = self.epoch, "Discarding stale connect outcome");
            // A newer attempt closes the stale session itself
            if result.is_ok() && self.state == ConnectionState::Disconnected {
                if let Err(e) = self.transport.disconnect().await {
                    debug!("Closing superseded session failed: {}", describe_error(&e));
                }
            }
            return;
        }
        self.connect_task = None;

        match result {
            Ok(receiver) => {
                self.inbound = Some(receiver);
                self.resubscribe_all().await;

                self.counters.connect_time = Some(Instant::now());
                self.counters.connect_count += 1;
                self.failed_attempts = 0;
                metrics().mqtt_connection_established();
                self.apply(ConnectionEvent::ConnectSucceeded);
            }
            Err(message) => {
                let error = RelayError::connect_failure(&message);
                self.failed_attempts += 1;
                metrics().mqtt_connection_failed();
                self.apply(ConnectionEvent::ConnectFailed(error.to_string()));
                self.schedule_reconnect();
            }
        }

        self.resolve_start_waiters();
    }

    /// Replay the static subscription set in order; failures never block the rest
    async fn resubscribe_all(&mut self) {
        for subscription in SUBSCRIPTIONS {
            match self
                .transport
                .subscribe(subscription.topic, subscription.qos)
                .await
            {
                Ok(()) => {
                    metrics().subscription_sent();
                    debug!(topic = subscription.topic, "Subscribed");
                }
                Err(e) => {
                    metrics().subscription_failed();
                    let error = RelayError::subscribe_failure(subscription.topic, describe_error(&e));
                    warn!("{}", error);
                }
            }
        }
    }

    async fn handle_connection_lost(&mut self, reason: String) {
        self.inbound = None;
        let reason = crate::error::sanitize_error_message(&reason);

        if !self.apply(ConnectionEvent::ConnectionLost(reason.clone())) {
            debug!(state = %self.state, reason = %reason, "Connection loss ignored");
            return;
        }

        self.counters.connection_losses += 1;
        self.counters.connect_time = None;
        metrics().mqtt_connection_lost();

        if let Err(e) = self.transport.disconnect().await {
            debug!("Closing lost session failed: {}", describe_error(&e));
        }

        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let decision = HealthMonitor::should_schedule_reconnect(
            self.reconnect_timer.is_some(),
            &self.settings.reconnect,
            self.state == ConnectionState::Disconnected,
        );

        match decision {
            ReconnectionDecision::Schedule { delay } => {
                let Some(events) = self.self_tx.upgrade() else {
                    return;
                };
                let epoch = self.epoch;

                self.counters.reconnects_scheduled += 1;
                metrics().reconnect_scheduled();
                info!(
                    attempt = self.failed_attempts + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );

                self.reconnect_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(SupervisorMessage::ReconnectTimerFired { epoch });
                }));
            }
            ReconnectionDecision::AlreadyPending => debug!("Reconnect already pending"),
            ReconnectionDecision::AbortStopRequested => debug!("Not reconnecting, stopped"),
        }
    }

    fn handle_reconnect_timer(&mut self, epoch: u64) {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "Discarding stale reconnect timer");
            return;
        }
        self.reconnect_timer = None;

        if self.apply(ConnectionEvent::ReconnectTimerFired) {
            self.begin_connect();
        }
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
            debug!("Pending reconnect cancelled");
        }
    }

    async fn handle_stop(&mut self) {
        self.cancel_reconnect_timer();
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.epoch += 1;
        self.inbound = None;

        let was_connected = self.state == ConnectionState::Connected;
        if was_connected {
            if let Err(e) = self.transport.disconnect().await {
                warn!("Disconnect failed: {}", describe_error(&e));
            }
            metrics().mqtt_disconnected();
        }

        if self.apply(ConnectionEvent::StopRequested) {
            self.counters.connect_time = None;
        }

        self.resolve_start_waiters();
    }

    async fn handle_publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QualityLevel,
    ) -> RelayResult<()> {
        validate_publish_topic(topic)?;

        if !HealthMonitor::can_publish(self.state) {
            return Err(RelayError::NotConnected { state: self.state });
        }

        self.transport
            .publish(topic, payload, qos)
            .await
            .map_err(|e| RelayError::publish_failure(topic, describe_error(&e)))
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(inbound) => {
                self.counters.last_message_time = Some(Instant::now());
                metrics().message_received();

                match self.router.route(&inbound) {
                    RouteAction::NotifyUser(notification) => {
                        metrics().notification_raised();
                        info!(topic = %inbound.topic, dedupe_id = notification.dedupe_id, "Device alert received");
                        self.sink.notify(&notification).await;
                    }
                    RouteAction::Observed { topic, status } => {
                        debug!(topic = %topic, ?status, "LED status observed");
                    }
                    RouteAction::Unrecognized { topic } => {
                        metrics().inbound_dropped();
                        debug!(topic = %topic, "Dropping message on unrecognized topic");
                    }
                    RouteAction::Malformed(error) => {
                        metrics().inbound_dropped();
                        warn!("{}", error);
                    }
                }
            }
            TransportEvent::ConnectionLost(reason) => self.handle_connection_lost(reason).await,
        }
    }

    fn resolve_start_waiters(&mut self) {
        for waiter in self.start_waiters.drain(..) {
            let _ = waiter.send(self.state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::notification::LoggingNotificationSink;
    use crate::testing::mocks::{MockTransport, TransportOp};
    use crate::transport::mqtt::connection::BrokerAddress;

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            options: ConnectOptions {
                broker: BrokerAddress {
                    host: "localhost".to_string(),
                    port: 1883,
                },
                client_id: "AndroidClient-1-deadbeef".to_string(),
                credentials: None,
                clean_session: false,
                keep_alive: Duration::from_secs(60),
            },
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_new_supervisor_is_disconnected() {
        let supervisor =
            ConnectionSupervisor::spawn(MockTransport::new(), settings(), Arc::new(LoggingNotificationSink));

        assert_eq!(supervisor.connection_status(), ConnectionState::Disconnected);
        assert_eq!(supervisor.client_id(), "AndroidClient-1-deadbeef");
    }

    #[tokio::test]
    async fn test_start_twice_connects_once() {
        let transport = MockTransport::new();
        let supervisor =
            ConnectionSupervisor::spawn(transport.clone(), settings(), Arc::new(LoggingNotificationSink));

        assert_eq!(supervisor.start().await, ConnectionState::Connected);
        assert_eq!(supervisor.start().await, ConnectionState::Connected);

        assert_eq!(transport.connect_count().await, 1);
    }

    #[tokio::test]
    async fn test_connect_uses_configured_client_id() {
        let transport = MockTransport::new();
        let supervisor =
            ConnectionSupervisor::spawn(transport.clone(), settings(), Arc::new(LoggingNotificationSink));

        supervisor.start().await;

        let operations = transport.operations().await;
        assert_eq!(
            operations[0],
            TransportOp::Connect {
                client_id: "AndroidClient-1-deadbeef".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_publish_rejects_invalid_topic() {
        let transport = MockTransport::new();
        let supervisor =
            ConnectionSupervisor::spawn(transport.clone(), settings(), Arc::new(LoggingNotificationSink));
        supervisor.start().await;

        let result = supervisor
            .publish("esp32/#", b"x".to_vec(), QualityLevel::AtLeastOnce)
            .await;
        assert!(matches!(result, Err(RelayError::InvalidTopic(_))));
        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_health_metrics_reflect_connection() {
        let supervisor =
            ConnectionSupervisor::spawn(MockTransport::new(), settings(), Arc::new(LoggingNotificationSink));

        let metrics = supervisor.health_metrics().await.unwrap();
        assert!(!metrics.is_healthy);

        supervisor.start().await;
        let metrics = supervisor.health_metrics().await.unwrap();
        assert!(metrics.is_healthy);
        assert_eq!(metrics.connect_count, 1);
        assert_eq!(metrics.state, ConnectionState::Connected);
    }
}
