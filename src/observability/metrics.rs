//! Thread-safe metrics collection system
//!
//! Provides atomic counters for tracking connection lifecycle, outbound
//! commands and inbound routing across the relay.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics
pub struct MetricsCollector {
    // Connection lifecycle
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connection_losses: AtomicU64,
    reconnects_scheduled: AtomicU64,
    connection_start_time: AtomicU64,
    subscriptions_sent: AtomicU64,
    subscription_failures: AtomicU64,

    // Outbound commands
    commands_submitted: AtomicU64,
    commands_published: AtomicU64,
    commands_dropped: AtomicU64,

    // Inbound routing
    messages_received: AtomicU64,
    notifications_raised: AtomicU64,
    inbound_dropped: AtomicU64,

    connection_status: Mutex<String>,
    uptime_start: AtomicU64,
    state_transitions: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connection_losses: AtomicU64::new(0),
            reconnects_scheduled: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            subscriptions_sent: AtomicU64::new(0),
            subscription_failures: AtomicU64::new(0),
            commands_submitted: AtomicU64::new(0),
            commands_published: AtomicU64::new(0),
            commands_dropped: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            notifications_raised: AtomicU64::new(0),
            inbound_dropped: AtomicU64::new(0),
            connection_status: Mutex::new("disconnected".to_string()),
            uptime_start: AtomicU64::new(current_timestamp()),
            state_transitions: AtomicU64::new(0),
        }
    }

    // Connection metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.connection_losses.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_disconnected(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_sent(&self) {
        self.subscriptions_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_failed(&self) {
        self.subscription_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Command metrics
    pub fn command_submitted(&self) {
        self.commands_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_published(&self) {
        self.commands_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_dropped(&self) {
        self.commands_dropped.fetch_add(1, Ordering::Relaxed);
    }

    // Inbound metrics
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_raised(&self) {
        self.notifications_raised.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_dropped(&self) {
        self.inbound_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the supervisor state name; counts changes only
    pub fn set_connection_status(&self, status: &str) {
        if let Ok(mut current) = self.connection_status.lock() {
            if *current != status {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current = status.to_string();
            }
        }
    }

    fn current_status(&self) -> String {
        self.connection_status
            .lock()
            .map(|status| status.clone())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        let counters = [
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connection_losses,
            &self.reconnects_scheduled,
            &self.connection_start_time,
            &self.subscriptions_sent,
            &self.subscription_failures,
            &self.commands_submitted,
            &self.commands_published,
            &self.commands_dropped,
            &self.messages_received,
            &self.notifications_raised,
            &self.inbound_dropped,
            &self.state_transitions,
        ];
        for counter in counters {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut status) = self.connection_status.lock() {
            *status = "disconnected".to_string();
        }
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let connection_start = self.connection_start_time.load(Ordering::Relaxed);
        let connection_duration_seconds = if connection_start > 0 {
            now.saturating_sub(connection_start)
        } else {
            0
        };

        MetricsSnapshot {
            connection: ConnectionMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                status: self.current_status(),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connection_losses: self.connection_losses.load(Ordering::Relaxed),
                reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
                subscriptions_sent: self.subscriptions_sent.load(Ordering::Relaxed),
                subscription_failures: self.subscription_failures.load(Ordering::Relaxed),
                connection_duration_seconds,
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
            },
            commands: CommandMetrics {
                submitted: self.commands_submitted.load(Ordering::Relaxed),
                published: self.commands_published.load(Ordering::Relaxed),
                dropped: self.commands_dropped.load(Ordering::Relaxed),
            },
            inbound: InboundMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                notifications_raised: self.notifications_raised.load(Ordering::Relaxed),
                dropped: self.inbound_dropped.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub commands: CommandMetrics,
    pub inbound: InboundMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub status: String,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connection_losses: u64,
    pub reconnects_scheduled: u64,
    pub subscriptions_sent: u64,
    pub subscription_failures: u64,
    pub connection_duration_seconds: u64,
    pub state_transitions: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandMetrics {
    pub submitted: u64,
    pub published: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboundMetrics {
    pub messages_received: u64,
    pub notifications_raised: u64,
    pub dropped: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
