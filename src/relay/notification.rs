//! User-facing notification surface
//!
//! The relay raises a notification for every device alert. Delivery is owned
//! by the host; this module only defines the seam and a logging sink.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::info;

/// Title used for every device-originated alert
pub const DEVICE_ALERT_TITLE: &str = "ESP32 Alert";

/// A notification ready to show to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Equal for equal content, so repeated alerts can replace each other
    pub dedupe_id: u32,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let title = title.into();
        let body = body.into();
        let dedupe_id = dedupe_id(&title, &body);
        Self {
            title,
            body,
            dedupe_id,
        }
    }
}

/// Derive the dedupe identifier from the notification content
pub fn dedupe_id(title: &str, body: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    (title, body).hash(&mut hasher);
    let hash = hasher.finish();
    (hash ^ (hash >> 32)) as u32
}

/// Destination for user-visible alerts
///
/// Implementations must not block for long; the supervisor awaits `notify`
/// inline while routing inbound messages.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification);
}

/// Sink that writes alerts to the log; the default for headless hosts
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn notify(&self, notification: &Notification) {
        info!(
            title = %notification.title,
            body = %notification.body,
            dedupe_id = notification.dedupe_id,
            "Device alert"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_id_is_stable_for_equal_content() {
        assert_eq!(
            dedupe_id(DEVICE_ALERT_TITLE, "Box 2 low"),
            dedupe_id(DEVICE_ALERT_TITLE, "Box 2 low")
        );
        assert_ne!(
            dedupe_id(DEVICE_ALERT_TITLE, "Box 2 low"),
            dedupe_id(DEVICE_ALERT_TITLE, "Box 3 low")
        );
    }

    #[test]
    fn test_notification_new_computes_dedupe_id() {
        let notification = Notification::new(DEVICE_ALERT_TITLE, "Device booted");
        assert_eq!(notification.title, "ESP32 Alert");
        assert_eq!(notification.body, "Device booted");
        assert_eq!(
            notification.dedupe_id,
            dedupe_id("ESP32 Alert", "Device booted")
        );
    }

    #[tokio::test]
    async fn test_logging_sink_accepts_notifications() {
        let sink = LoggingNotificationSink;
        sink.notify(&Notification::new(DEVICE_ALERT_TITLE, ""))
            .await;
    }
}
