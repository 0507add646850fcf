//! Command and payload types for the ESP32 pill box protocol
//!
//! This module defines the typed commands accepted from the UI layer and the
//! JSON payload shapes the device firmware expects on the wire.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A local user action destined for the device
///
/// Commands are immutable once built and are consumed by value when
/// submitted to the relay.
///
/// # Examples
/// ```
/// use pillbox_relay::protocol::Command;
///
/// let led_on = Command::SetLed { pin: 19, on: true };
/// let period = Command::SetPeriod { pin: 19, seconds: 28800 };
/// let reset = Command::Reset { pin: 22 };
/// assert_eq!(led_on.pin(), 19);
/// assert_eq!(period.kind(), "set_period");
/// assert_eq!(reset.pin(), 22);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    /// Switch the indicator LED of a box on or off
    SetLed { pin: u8, on: bool },
    /// Change the dosing period of a box
    SetPeriod { pin: u8, seconds: u32 },
    /// Reset the box timer after a dose was taken
    Reset { pin: u8 },
}

impl Command {
    /// GPIO pin the command addresses
    pub fn pin(&self) -> u8 {
        match self {
            Command::SetLed { pin, .. } | Command::SetPeriod { pin, .. } | Command::Reset { pin } => {
                *pin
            }
        }
    }

    /// Short name used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Command::SetLed { .. } => "set_led",
            Command::SetPeriod { .. } => "set_period",
            Command::Reset { .. } => "reset",
        }
    }
}

/// LED state as spelled by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LedState {
    On,
    Off,
}

impl From<bool> for LedState {
    fn from(on: bool) -> Self {
        if on {
            LedState::On
        } else {
            LedState::Off
        }
    }
}

/// Payload for `esp32/led/command`: `{"pin":19,"state":"ON"}`
///
/// Field order is part of the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedCommandPayload {
    pub pin: u8,
    pub state: LedState,
}

/// Payload for `esp32/period`: `{"pin":19,"period":60}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodPayload {
    pub pin: u8,
    pub period: u32,
}

/// A message delivered by the broker on a subscribed topic
///
/// Inbound events are ephemeral: they are routed once and never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Decode the payload as UTF-8 text
    pub fn payload_text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}
