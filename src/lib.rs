//! Pill Box Relay
//!
//! MQTT command relay and connection supervisor for ESP32 pill box
//! controllers.
//!
//! # Overview
//!
//! This crate keeps one supervised broker connection alive and relays
//! between the user-facing host and the device:
//! - Typed commands (LED on/off, dosing period, timer reset) encoded into the
//!   fixed topic/payload table the firmware understands
//! - Connection supervision with a fixed reconnect delay and automatic
//!   resubscription
//! - Routing of inbound device events to user notifications
//! - A dosing schedule that drives the box LEDs
//!
//! # Quick Start
//!
//! ```rust
//! use pillbox_relay::protocol::{Command, COMMAND_QOS};
//! use pillbox_relay::relay::TopicRouter;
//!
//! let router = TopicRouter::new();
//! let message = router.encode_command(Command::SetLed { pin: 19, on: true });
//!
//! assert_eq!(message.topic, "esp32/led/command");
//! assert_eq!(message.payload, br#"{"pin":19,"state":"ON"}"#.to_vec());
//! assert_eq!(message.qos, COMMAND_QOS);
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod relay;
pub mod schedule;
pub mod testing;
pub mod transport;

pub use config::*;
pub use error::{RelayError, RelayResult};
pub use protocol::*;
pub use relay::{
    CommandRelay, CommandSubmitter, ConnectionSupervisor, Notification, NotificationSink,
    SubmitOutcome, SupervisorSettings, TopicRouter,
};
pub use schedule::{PillBox, ScheduleEvaluator};
pub use transport::mqtt::{ConnectionState, MqttClient};
