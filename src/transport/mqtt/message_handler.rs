//! Pure message routing logic for MQTT events
//!
//! This module turns raw `rumqttc` events into routing decisions and maps
//! protocol QoS values onto the client library's type. Nothing here performs
//! I/O.

use crate::protocol::QualityLevel;
use rumqttc::{Event, Packet, QoS, SubscribeReasonCode};
use tracing::debug;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    granted: suback
                        .return_codes
                        .iter()
                        .map(|code| matches!(code, SubscribeReasonCode::Success(_)))
                        .collect(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Map a protocol quality level onto the client library QoS (pure function)
    pub fn to_qos(level: QualityLevel) -> QoS {
        match level {
            QualityLevel::AtMostOnce => QoS::AtMostOnce,
            QualityLevel::AtLeastOnce => QoS::AtLeastOnce,
            QualityLevel::ExactlyOnce => QoS::ExactlyOnce,
        }
    }

    /// Validate subscription success from a SubAck (pure function)
    pub fn validate_subscription_success(granted: &[bool]) -> Result<(), String> {
        if granted.iter().all(|ok| *ok) {
            Ok(())
        } else {
            debug!(?granted, "Broker rejected subscription");
            Err(format!("Subscription rejected by broker: {granted:?}"))
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged { session_present: bool },
    /// Message received on a subscribed topic
    MessageReceived {
        topic: String,
        payload: bytes::Bytes,
        retain: bool,
    },
    /// Broker closed the session
    Disconnected,
    /// Subscription confirmed; one flag per requested filter
    SubscriptionConfirmed { packet_id: u16, granted: Vec<bool> },
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
