//! Command relay: the single outbound entry point for UI actions
//!
//! `submit` never fails loudly. A command that cannot be delivered right now
//! is dropped and logged; there is no outbound queue, so the caller retries
//! by repeating the user action.

use super::router::TopicRouter;
use super::supervisor::ConnectionSupervisor;
use crate::error::RelayError;
use crate::observability::metrics;
use crate::protocol::Command;
use crate::transport::mqtt::ConnectionState;
use async_trait::async_trait;
use tracing::{debug, warn, Instrument};

/// Result of submitting a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Handed to the transport
    Published,
    /// Not delivered; already logged
    Dropped,
}

/// Anything that accepts typed commands for delivery to the device
#[async_trait]
pub trait CommandSubmitter: Send + Sync {
    async fn submit(&self, command: Command) -> SubmitOutcome;
}

/// Encodes commands and publishes them through the connection supervisor
#[derive(Clone)]
pub struct CommandRelay {
    supervisor: ConnectionSupervisor,
    router: TopicRouter,
}

impl CommandRelay {
    pub fn new(supervisor: ConnectionSupervisor) -> Self {
        Self {
            supervisor,
            router: TopicRouter::new(),
        }
    }

    /// Current connection state, for UI indicators
    pub fn connection_status(&self) -> ConnectionState {
        self.supervisor.connection_status()
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    async fn deliver(&self, command: Command) -> SubmitOutcome {
        metrics().command_submitted();
        let message = self.router.encode_command(command);

        match self
            .supervisor
            .publish(message.topic, message.payload, message.qos)
            .await
        {
            Ok(()) => {
                metrics().command_published();
                debug!(topic = message.topic, "Command published");
                SubmitOutcome::Published
            }
            Err(RelayError::NotConnected { state }) => {
                metrics().command_dropped();
                warn!(
                    topic = message.topic,
                    state = %state,
                    "Command dropped, not connected"
                );
                SubmitOutcome::Dropped
            }
            Err(e) => {
                metrics().command_dropped();
                warn!(topic = message.topic, "Command dropped: {}", e);
                SubmitOutcome::Dropped
            }
        }
    }
}

#[async_trait]
impl CommandSubmitter for CommandRelay {
    async fn submit(&self, command: Command) -> SubmitOutcome {
        let span = crate::relay_span!(kind = command.kind(), pin = command.pin());
        self.deliver(command).instrument(span).await
    }
}
