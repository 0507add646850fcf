//! Pure health monitoring and reconnection logic for the connection supervisor
//!
//! This module contains pure functions for state transitions, reconnect
//! decisions and connection health metrics. The supervisor owns the state;
//! everything here only computes.

use super::connection::{ConnectionState, ReconnectConfig};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide whether a reconnect timer should be armed (pure function)
    ///
    /// At most one timer may be pending at a time, and none is armed once the
    /// host has asked the supervisor to stop.
    pub fn should_schedule_reconnect(
        timer_pending: bool,
        config: &ReconnectConfig,
        stop_requested: bool,
    ) -> ReconnectionDecision {
        if stop_requested {
            return ReconnectionDecision::AbortStopRequested;
        }

        if timer_pending {
            return ReconnectionDecision::AlreadyPending;
        }

        ReconnectionDecision::Schedule {
            delay: config.delay(),
        }
    }

    /// Determine next state after a connection event (pure function)
    ///
    /// Returns `None` when the event does not move the state machine.
    pub fn determine_next_state(
        current_state: ConnectionState,
        event: &ConnectionEvent,
    ) -> Option<ConnectionState> {
        use ConnectionState::*;

        match (current_state, event) {
            (Disconnected | ReconnectPending, ConnectionEvent::StartRequested) => Some(Connecting),
            (Connecting, ConnectionEvent::ConnectSucceeded) => Some(Connected),
            (Connecting, ConnectionEvent::ConnectFailed(_)) => Some(ReconnectPending),
            (Connected, ConnectionEvent::ConnectionLost(_)) => Some(ReconnectPending),
            (ReconnectPending, ConnectionEvent::ReconnectTimerFired) => Some(Connecting),
            (Connecting | Connected | ReconnectPending, ConnectionEvent::StopRequested) => {
                Some(Disconnected)
            }
            _ => None,
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Calculate health metrics for the connection (pure function)
    pub fn calculate_health_metrics(
        state: ConnectionState,
        counters: &ConnectionCounters,
    ) -> HealthMetrics {
        let now = Instant::now();

        let uptime = counters.connect_time.map(|t| now.duration_since(t));
        let time_since_last_message = counters.last_message_time.map(|t| now.duration_since(t));

        HealthMetrics {
            state,
            uptime,
            time_since_last_message,
            connect_count: counters.connect_count,
            reconnects_scheduled: counters.reconnects_scheduled,
            connection_losses: counters.connection_losses,
            is_healthy: Self::determine_health_status(state, uptime),
        }
    }

    /// The device only talks when something happens, so silence is not a
    /// health signal; only the connection itself is.
    fn determine_health_status(state: ConnectionState, uptime: Option<Duration>) -> bool {
        state == ConnectionState::Connected && uptime.is_some()
    }

    /// Log connection state transition
    pub fn log_state_transition(from: ConnectionState, to: ConnectionState, reason: Option<&str>) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::ReconnectPending) => {
                warn!(
                    reason = reason.unwrap_or("unknown"),
                    "MQTT connection lost, reconnect scheduled"
                );
            }
            (ConnectionState::Connecting, ConnectionState::ReconnectPending) => {
                warn!(
                    reason = reason.unwrap_or("unknown"),
                    "MQTT connect attempt failed, reconnect scheduled"
                );
            }
            (ConnectionState::ReconnectPending, ConnectionState::Connecting) => {
                info!("Starting reconnect attempt");
            }
            (_, ConnectionState::Disconnected) => {
                info!(from = %from, "MQTT connection stopped");
            }
            _ => {
                debug!(from = %from, to = %to, "MQTT connection state changed");
            }
        }
    }
}

/// Decision result for arming a reconnect timer
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Arm a timer that fires after `delay`
    Schedule { delay: Duration },
    /// A timer is already pending; do nothing
    AlreadyPending,
    /// The supervisor is stopping
    AbortStopRequested,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Host called `start()`
    StartRequested,
    /// Broker acknowledged the connection
    ConnectSucceeded,
    /// Connect attempt failed or timed out
    ConnectFailed(String),
    /// Established connection dropped
    ConnectionLost(String),
    /// Reconnect delay elapsed
    ReconnectTimerFired,
    /// Host called `stop()`
    StopRequested,
}

/// Raw counters the supervisor keeps for health reporting
#[derive(Debug, Clone, Default)]
pub struct ConnectionCounters {
    pub connect_time: Option<Instant>,
    pub last_message_time: Option<Instant>,
    pub connect_count: u64,
    pub reconnects_scheduled: u64,
    pub connection_losses: u64,
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub state: ConnectionState,
    /// Time since the current connection was established
    pub uptime: Option<Duration>,
    /// Time since the last inbound message
    pub time_since_last_message: Option<Duration>,
    /// Successful connects since the supervisor was created
    pub connect_count: u64,
    /// Reconnect timers armed since the supervisor was created
    pub reconnects_scheduled: u64,
    pub connection_losses: u64,
    pub is_healthy: bool,
}

/// Connection quality assessment
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    /// Stable for over an hour without losses
    Excellent,
    Good,
    /// Some losses, but working
    Fair,
    /// Frequent losses
    Poor,
    /// Not connected
    Critical,
}

impl HealthMonitor {
    /// Assess connection quality based on metrics (pure function)
    pub fn assess_connection_quality(metrics: &HealthMetrics) -> ConnectionQuality {
        if !metrics.is_healthy {
            return ConnectionQuality::Critical;
        }

        match (metrics.connection_losses, metrics.uptime) {
            (0, Some(uptime)) if uptime > Duration::from_secs(3600) => ConnectionQuality::Excellent,
            (0, Some(_)) => ConnectionQuality::Good,
            (1..=2, Some(uptime)) if uptime > Duration::from_secs(1800) => ConnectionQuality::Good,
            (1..=5, Some(_)) => ConnectionQuality::Fair,
            (6..=20, Some(_)) => ConnectionQuality::Poor,
            _ => ConnectionQuality::Critical,
        }
    }
}
