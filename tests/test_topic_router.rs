//! Topic router tests
//!
//! Encoding must be total and deterministic, and inbound routing must only
//! act on the exact topics the device publishes.

use pillbox_relay::protocol::{
    validate_publish_topic, Command, InboundEvent, LedState, COMMAND_QOS, LED_COMMAND_TOPIC,
    LED_STATUS_TOPIC, PERIOD_TOPIC, RESET_TOPIC, STARTUP_TOPIC, SUBSCRIPTIONS,
};
use pillbox_relay::relay::{dedupe_id, RouteAction, TopicRouter, DEVICE_ALERT_TITLE};
use proptest::prelude::*;

fn any_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        (any::<u8>(), any::<bool>()).prop_map(|(pin, on)| Command::SetLed { pin, on }),
        (any::<u8>(), any::<u32>()).prop_map(|(pin, seconds)| Command::SetPeriod { pin, seconds }),
        any::<u8>().prop_map(|pin| Command::Reset { pin }),
    ]
}

proptest! {
    #[test]
    fn prop_encoding_is_deterministic(command in any_command()) {
        let router = TopicRouter::new();
        prop_assert_eq!(router.encode_command(command), router.encode_command(command));
    }

    #[test]
    fn prop_encoded_topic_is_publishable(command in any_command()) {
        let message = TopicRouter::new().encode_command(command);
        prop_assert!(validate_publish_topic(message.topic).is_ok());
        prop_assert_eq!(message.qos, COMMAND_QOS);
    }

    #[test]
    fn prop_encoded_payload_matches_command(command in any_command()) {
        let message = TopicRouter::new().encode_command(command);
        let text = String::from_utf8(message.payload).unwrap();

        match command {
            Command::SetLed { pin, on } => {
                prop_assert_eq!(message.topic, LED_COMMAND_TOPIC);
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                prop_assert_eq!(value["pin"].as_u64(), Some(u64::from(pin)));
                let state: LedState = serde_json::from_value(value["state"].clone()).unwrap();
                prop_assert_eq!(state, LedState::from(on));
            }
            Command::SetPeriod { pin, seconds } => {
                prop_assert_eq!(message.topic, PERIOD_TOPIC);
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                prop_assert_eq!(value["pin"].as_u64(), Some(u64::from(pin)));
                prop_assert_eq!(value["period"].as_u64(), Some(u64::from(seconds)));
            }
            Command::Reset { pin } => {
                prop_assert_eq!(message.topic, RESET_TOPIC);
                prop_assert_eq!(text.parse::<u8>().unwrap(), pin);
            }
        }
    }

    #[test]
    fn prop_startup_text_becomes_notification(body in "\\PC*") {
        let event = InboundEvent::new(STARTUP_TOPIC, body.clone().into_bytes());
        match TopicRouter::new().route(&event) {
            RouteAction::NotifyUser(notification) => {
                prop_assert_eq!(notification.title.as_str(), DEVICE_ALERT_TITLE);
                prop_assert_eq!(notification.dedupe_id, dedupe_id(DEVICE_ALERT_TITLE, &body));
                prop_assert_eq!(notification.body, body);
            }
            other => prop_assert!(false, "unexpected route {:?}", other),
        }
    }
}

#[test]
fn test_subscription_table_is_fixed() {
    let topics: Vec<&str> = SUBSCRIPTIONS.iter().map(|s| s.topic).collect();
    assert_eq!(topics, vec![STARTUP_TOPIC, LED_STATUS_TOPIC]);
}

#[test]
fn test_topic_matching_is_exact() {
    let router = TopicRouter::new();

    for topic in [
        "esp32/startup/extra",
        "ESP32/startup",
        "esp32/startup ",
        "/esp32/startup",
        "esp32/+",
        "esp32/#",
    ] {
        let action = router.route(&InboundEvent::new(topic.to_string(), "hello"));
        assert!(
            matches!(action, RouteAction::Unrecognized { .. }),
            "{topic} should not be recognized"
        );
    }
}

#[test]
fn test_led_status_is_observed_not_notified() {
    let router = TopicRouter::new();

    let action = router.route(&InboundEvent::new(
        LED_STATUS_TOPIC,
        r#"{"pin":19,"state":"OFF"}"#,
    ));
    match action {
        RouteAction::Observed { topic, status } => {
            assert_eq!(topic, LED_STATUS_TOPIC);
            let status = status.unwrap();
            assert_eq!(status.pin, 19);
            assert_eq!(status.state, LedState::Off);
        }
        other => panic!("unexpected route {other:?}"),
    }

    // Free-form status text is still only observed
    let action = router.route(&InboundEvent::new(LED_STATUS_TOPIC, "LED 19 on"));
    assert!(matches!(action, RouteAction::Observed { status: None, .. }));
}

#[test]
fn test_invalid_utf8_on_startup_is_malformed() {
    let action = TopicRouter::new().route(&InboundEvent::new(STARTUP_TOPIC, vec![0xc3_u8, 0x28]));
    assert!(matches!(action, RouteAction::Malformed(_)));
}

#[test]
fn test_empty_startup_payload_still_notifies() {
    let action = TopicRouter::new().route(&InboundEvent::new(STARTUP_TOPIC, ""));
    match action {
        RouteAction::NotifyUser(notification) => assert!(notification.body.is_empty()),
        other => panic!("unexpected route {other:?}"),
    }
}
