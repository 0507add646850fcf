//! Impure I/O operations for the MQTT transport
//!
//! This module owns the `rumqttc` client and event loop for one session at a
//! time. The event loop is pumped on a background task that forwards inbound
//! publishes and reports the end of the session exactly once.

use super::connection::{configure_mqtt_options, ConnectOptions, MqttError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::protocol::{InboundEvent, QualityLevel};
use crate::transport::{Transport, TransportEvent};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const EVENT_CHANNEL_CAPACITY: usize = 64;
const PUMP_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct Session {
    client: AsyncClient,
    pump: JoinHandle<()>,
}

/// MQTT transport backed by `rumqttc`
pub struct MqttClient {
    session: Mutex<Option<Session>>,
}

impl Default for MqttClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttClient {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }

    /// Poll the event loop until the broker acknowledges the connection
    ///
    /// A refused ConnAck surfaces as a poll error.
    async fn wait_for_connection_confirmation(event_loop: &mut EventLoop) -> Result<(), MqttError> {
        loop {
            let event = event_loop
                .poll()
                .await
                .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))?;

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged { session_present } => {
                    debug!(session_present, "Broker acknowledged connection");
                    return Ok(());
                }
                other => trace!(?other, "Event before ConnAck"),
            }
        }
    }

    /// Forward session events until the session ends or the owner goes away
    async fn pump_events(mut event_loop: EventLoop, events: mpsc::Sender<TransportEvent>) {
        loop {
            let event = match event_loop.poll().await {
                Ok(event) => event,
                Err(e) => {
                    let _ = events
                        .send(TransportEvent::ConnectionLost(e.to_string()))
                        .await;
                    break;
                }
            };

            if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
                debug!("Client-initiated disconnect sent, stopping event pump");
                break;
            }

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::MessageReceived {
                    topic,
                    payload,
                    retain,
                } => {
                    trace!(topic = %topic, retain, bytes = payload.len(), "Inbound publish");
                    let inbound = InboundEvent::new(topic, payload);
                    if events.send(TransportEvent::Message(inbound)).await.is_err() {
                        debug!("Event receiver dropped, stopping event pump");
                        break;
                    }
                }
                EventRoute::Disconnected => {
                    let _ = events
                        .send(TransportEvent::ConnectionLost(
                            "Broker closed the session".to_string(),
                        ))
                        .await;
                    break;
                }
                EventRoute::SubscriptionConfirmed { packet_id, granted } => {
                    if let Err(e) = MessageHandler::validate_subscription_success(&granted) {
                        warn!(packet_id, "{}", e);
                    } else {
                        debug!(packet_id, "Subscription confirmed");
                    }
                }
                EventRoute::ConnectionAcknowledged { .. }
                | EventRoute::InfrastructureEvent(_)
                | EventRoute::OutgoingEvent => {}
            }
        }
        debug!("MQTT event pump stopped");
    }

    /// Disconnect the session and give the pump a moment to finish
    async fn close_session(session: Session) {
        if let Err(e) = session.client.disconnect().await {
            debug!("Disconnect request not delivered: {}", e);
        }

        let mut pump = session.pump;
        match tokio::time::timeout(PUMP_SHUTDOWN_GRACE, &mut pump).await {
            Ok(Ok(())) => debug!("Event pump shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event pump ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Event pump didn't shut down gracefully, forcing abort");
                pump.abort();
            }
        }
    }

    /// Clone the client handle of the open session
    async fn current_client(&self) -> Result<AsyncClient, MqttError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or(MqttError::NoSession)
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<mpsc::Receiver<TransportEvent>, Self::Error> {
        if let Some(stale) = self.session.lock().await.take() {
            debug!("Closing previous session before reconnecting");
            Self::close_session(stale).await;
        }

        info!(
            broker = %format!("{}:{}", options.broker.host, options.broker.port),
            client_id = %options.client_id,
            clean_session = options.clean_session,
            "Connecting to MQTT broker"
        );

        let mqtt_options = configure_mqtt_options(options);
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        Self::wait_for_connection_confirmation(&mut event_loop).await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pump = tokio::spawn(Self::pump_events(event_loop, events_tx));

        *self.session.lock().await = Some(Session { client, pump });
        Ok(events_rx)
    }

    async fn subscribe(&self, topic: &str, qos: QualityLevel) -> Result<(), Self::Error> {
        let client = self.current_client().await?;
        client
            .subscribe(topic, MessageHandler::to_qos(qos))
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QualityLevel,
    ) -> Result<(), Self::Error> {
        let client = self.current_client().await?;
        // Never wait on a full request queue; the caller drops on failure
        client
            .try_publish(topic, MessageHandler::to_qos(qos), false, payload)
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => {
                Self::close_session(session).await;
                info!("MQTT session closed");
            }
            None => debug!("Disconnect requested with no open session"),
        }
        Ok(())
    }
}
