//! Topic routing: typed commands out, inbound events in
//!
//! Both directions are pure. Outbound payloads are built from typed fields so
//! encoding cannot fail; inbound payloads are only checked for UTF-8.

use super::notification::{Notification, DEVICE_ALERT_TITLE};
use crate::error::RelayError;
use crate::protocol::{
    Command, InboundEvent, LedCommandPayload, LedState, PeriodPayload, QualityLevel, COMMAND_QOS,
    LED_COMMAND_TOPIC, LED_STATUS_TOPIC, PERIOD_TOPIC, RESET_TOPIC, STARTUP_TOPIC,
};
use serde::Serialize;
use tracing::debug;

/// A command encoded for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: &'static str,
    pub payload: Vec<u8>,
    pub qos: QualityLevel,
}

/// What the relay should do with an inbound event
#[derive(Debug)]
pub enum RouteAction {
    /// Surface a notification to the user
    NotifyUser(Notification),
    /// Recognised but currently unhandled (LED status echo)
    Observed {
        topic: String,
        status: Option<LedCommandPayload>,
    },
    /// Topic is not part of the protocol; drop it
    Unrecognized { topic: String },
    /// Payload could not be decoded; drop it
    Malformed(RelayError),
}

/// Serialize a command payload
///
/// The payload structs hold only integers and unit enum variants, which
/// `serde_json` always serializes, so the error arm is unreachable.
fn json_payload<T: Serialize>(payload: &T) -> Vec<u8> {
    serde_json::to_vec(payload).unwrap_or_default()
}

/// Maps commands to topics and payloads, and inbound topics to actions
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicRouter;

impl TopicRouter {
    pub fn new() -> Self {
        Self
    }

    /// Encode a command (pure, total)
    ///
    /// - `SetLed` → `esp32/led/command`, `{"pin":<pin>,"state":"ON"|"OFF"}`
    /// - `SetPeriod` → `esp32/period`, `{"pin":<pin>,"period":<seconds>}`
    /// - `Reset` → `esp32/reset`, the pin as decimal text
    pub fn encode_command(&self, command: Command) -> OutboundMessage {
        let (topic, payload) = match command {
            Command::SetLed { pin, on } => (
                LED_COMMAND_TOPIC,
                json_payload(&LedCommandPayload {
                    pin,
                    state: LedState::from(on),
                }),
            ),
            Command::SetPeriod { pin, seconds } => (
                PERIOD_TOPIC,
                json_payload(&PeriodPayload {
                    pin,
                    period: seconds,
                }),
            ),
            Command::Reset { pin } => (RESET_TOPIC, pin.to_string().into_bytes()),
        };

        OutboundMessage {
            topic,
            payload,
            qos: COMMAND_QOS,
        }
    }

    /// Decide what to do with an inbound event (pure)
    pub fn route(&self, event: &InboundEvent) -> RouteAction {
        match event.topic.as_str() {
            STARTUP_TOPIC => match event.payload_text() {
                Ok(text) => RouteAction::NotifyUser(Notification::new(DEVICE_ALERT_TITLE, text)),
                Err(e) => RouteAction::Malformed(RelayError::malformed_inbound(
                    &event.topic,
                    e.to_string(),
                )),
            },
            LED_STATUS_TOPIC => match event.payload_text() {
                Ok(text) => {
                    let status = serde_json::from_str::<LedCommandPayload>(text).ok();
                    if status.is_none() {
                        debug!(payload = %text, "LED status payload not in command shape");
                    }
                    RouteAction::Observed {
                        topic: event.topic.clone(),
                        status,
                    }
                }
                Err(e) => RouteAction::Malformed(RelayError::malformed_inbound(
                    &event.topic,
                    e.to_string(),
                )),
            },
            other => RouteAction::Unrecognized {
                topic: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text(message: &OutboundMessage) -> &str {
        std::str::from_utf8(&message.payload).unwrap()
    }

    #[test]
    fn test_encode_led_command() {
        let router = TopicRouter::new();

        let message = router.encode_command(Command::SetLed { pin: 19, on: true });
        assert_eq!(message.topic, "esp32/led/command");
        assert_eq!(text(&message), r#"{"pin":19,"state":"ON"}"#);
        assert_eq!(message.qos, QualityLevel::AtLeastOnce);

        let message = router.encode_command(Command::SetLed { pin: 4, on: false });
        assert_eq!(text(&message), r#"{"pin":4,"state":"OFF"}"#);
    }

    #[test]
    fn test_encode_period_command() {
        let message = TopicRouter::new().encode_command(Command::SetPeriod {
            pin: 21,
            seconds: 60,
        });
        assert_eq!(message.topic, "esp32/period");
        assert_eq!(text(&message), r#"{"pin":21,"period":60}"#);
    }

    #[test]
    fn test_encode_reset_command() {
        let message = TopicRouter::new().encode_command(Command::Reset { pin: 19 });
        assert_eq!(message.topic, "esp32/reset");
        assert_eq!(message.payload, b"19".to_vec());
    }

    #[test]
    fn test_route_startup_alert() {
        let event = InboundEvent::new("esp32/startup", "Box 2 low");
        match TopicRouter::new().route(&event) {
            RouteAction::NotifyUser(notification) => {
                assert_eq!(notification.title, "ESP32 Alert");
                assert_eq!(notification.body, "Box 2 low");
            }
            other => panic!("Expected NotifyUser, got {other:?}"),
        }
    }

    #[test]
    fn test_route_empty_startup_payload_still_notifies() {
        let event = InboundEvent::new("esp32/startup", "");
        assert!(matches!(
            TopicRouter::new().route(&event),
            RouteAction::NotifyUser(n) if n.body.is_empty()
        ));
    }

    #[test]
    fn test_route_led_status_is_observed() {
        let event = InboundEvent::new("esp32/led/status", r#"{"pin":19,"state":"ON"}"#);
        match TopicRouter::new().route(&event) {
            RouteAction::Observed { topic, status } => {
                assert_eq!(topic, "esp32/led/status");
                assert_eq!(
                    status,
                    Some(LedCommandPayload {
                        pin: 19,
                        state: LedState::On
                    })
                );
            }
            other => panic!("Expected Observed, got {other:?}"),
        }

        let event = InboundEvent::new("esp32/led/status", "on");
        assert!(matches!(
            TopicRouter::new().route(&event),
            RouteAction::Observed { status: None, .. }
        ));
    }

    #[test]
    fn test_route_unrecognized_topic() {
        let event = InboundEvent::new("esp32/unknown", "whatever");
        assert!(matches!(
            TopicRouter::new().route(&event),
            RouteAction::Unrecognized { topic } if topic == "esp32/unknown"
        ));
    }

    #[test]
    fn test_route_non_utf8_is_malformed() {
        let event = InboundEvent::new("esp32/startup", vec![0xc3, 0x28]);
        match TopicRouter::new().route(&event) {
            RouteAction::Malformed(RelayError::MalformedInbound { topic, .. }) => {
                assert_eq!(topic, "esp32/startup");
            }
            other => panic!("Expected Malformed, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn led_payload_has_firmware_shape(pin in any::<u8>(), on in any::<bool>()) {
            let message = TopicRouter::new().encode_command(Command::SetLed { pin, on });
            let state = if on { "ON" } else { "OFF" };
            prop_assert_eq!(text(&message), format!(r#"{{"pin":{pin},"state":"{state}"}}"#));
        }

        #[test]
        fn period_payload_has_firmware_shape(pin in any::<u8>(), seconds in any::<u32>()) {
            let message = TopicRouter::new().encode_command(Command::SetPeriod { pin, seconds });
            prop_assert_eq!(text(&message), format!(r#"{{"pin":{pin},"period":{seconds}}}"#));
        }

        #[test]
        fn reset_payload_parses_back_to_pin(pin in any::<u8>()) {
            let message = TopicRouter::new().encode_command(Command::Reset { pin });
            let parsed: u8 = std::str::from_utf8(&message.payload).unwrap().parse().unwrap();
            prop_assert_eq!(parsed, pin);
        }
    }
}
