//! The relay between local user actions and the ESP32 pill box
//!
//! - [`supervisor`] - owns the broker connection and its reconnect policy
//! - [`router`] - maps commands to topics/payloads and inbound topics to actions
//! - [`command_relay`] - fire-and-forget outbound entry point
//! - [`notification`] - user-facing alert seam

pub mod command_relay;
pub mod notification;
pub mod router;
pub mod supervisor;

pub use command_relay::{CommandRelay, CommandSubmitter, SubmitOutcome};
pub use notification::{
    dedupe_id, LoggingNotificationSink, Notification, NotificationSink, DEVICE_ALERT_TITLE,
};
pub use router::{OutboundMessage, RouteAction, TopicRouter};
pub use supervisor::{ConnectionSupervisor, SupervisorSettings};
