//! Topic names, the static subscription table and topic validation
//!
//! Topic strings are shared with the ESP32 firmware and must not change.

use thiserror::Error;

/// Outbound: LED on/off commands
pub const LED_COMMAND_TOPIC: &str = "esp32/led/command";
/// Outbound: dosing period updates
pub const PERIOD_TOPIC: &str = "esp32/period";
/// Outbound: box timer reset
pub const RESET_TOPIC: &str = "esp32/reset";
/// Inbound: free-text alerts raised by the device (boot, low stock)
pub const STARTUP_TOPIC: &str = "esp32/startup";
/// Inbound: LED status echo, reserved for future state sync
pub const LED_STATUS_TOPIC: &str = "esp32/led/status";

/// Delivery assurance requested for a publish or subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// A topic filter the relay subscribes to on every (re)connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub topic: &'static str,
    pub qos: QualityLevel,
}

/// The fixed subscription set, replayed in this order after each connect
pub static SUBSCRIPTIONS: &[Subscription] = &[
    Subscription {
        topic: STARTUP_TOPIC,
        qos: QualityLevel::AtLeastOnce,
    },
    Subscription {
        topic: LED_STATUS_TOPIC,
        qos: QualityLevel::AtLeastOnce,
    },
];

/// QoS used for every outbound command
pub const COMMAND_QOS: QualityLevel = QualityLevel::AtLeastOnce;

/// Validate a topic name used for publishing
///
/// Publish topics must be non-empty, must not contain wildcards and must not
/// contain NUL characters.
pub fn validate_publish_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }

    for ch in topic.chars() {
        match ch {
            '+' | '#' => return Err(ValidationError::WildcardInTopic(topic.to_string())),
            '\0' => return Err(ValidationError::NulInTopic),
            _ => {}
        }
    }

    Ok(())
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Publish topic contains a wildcard: '{0}'")]
    WildcardInTopic(String),
    #[error("Topic contains a NUL character")]
    NulInTopic,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_subscription_table_order() {
        let topics: Vec<&str> = SUBSCRIPTIONS.iter().map(|s| s.topic).collect();
        assert_eq!(topics, vec!["esp32/startup", "esp32/led/status"]);
        assert!(SUBSCRIPTIONS
            .iter()
            .all(|s| s.qos == QualityLevel::AtLeastOnce));
    }

    #[test]
    fn test_outbound_topics_are_valid() {
        for topic in [LED_COMMAND_TOPIC, PERIOD_TOPIC, RESET_TOPIC] {
            assert!(validate_publish_topic(topic).is_ok(), "{topic}");
        }
    }

    #[test]
    fn test_invalid_publish_topics() {
        assert_eq!(validate_publish_topic(""), Err(ValidationError::EmptyTopic));
        assert!(matches!(
            validate_publish_topic("esp32/+/command"),
            Err(ValidationError::WildcardInTopic(_))
        ));
        assert!(matches!(
            validate_publish_topic("esp32/#"),
            Err(ValidationError::WildcardInTopic(_))
        ));
        assert_eq!(
            validate_publish_topic("esp32\0reset"),
            Err(ValidationError::NulInTopic)
        );
    }

    proptest! {
        #[test]
        fn plain_topics_always_validate(topic in "[a-z0-9]{1,16}(/[a-z0-9]{1,16}){0,4}") {
            prop_assert!(validate_publish_topic(&topic).is_ok());
        }
    }
}
