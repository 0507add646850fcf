//! Error types for the pill box relay
//!
//! Every failure is caught at the boundary where it happens and turned into a
//! log entry plus either a state transition or a dropped message. None of these
//! errors is fatal to the host process.

use crate::transport::mqtt::ConnectionState;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|key|secret)[=:]\s*\S+")
        .expect("secret pattern is a valid regex")
});

static URL_USERINFO_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([a-zA-Z][a-zA-Z0-9+.-]*://)[^/@\s:]+:[^/@\s]+@")
        .expect("userinfo pattern is a valid regex")
});

const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// Bad address, rejected credentials or timeout while connecting
    #[error("Connect failed: {message}")]
    ConnectFailure { message: String },

    /// Publish attempted while the supervisor is not connected
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    /// Transport refused or failed to send an outbound message
    #[error("Publish failed on {topic}: {message}")]
    PublishFailure { topic: String, message: String },

    /// A subscription from the static set could not be (re)applied
    #[error("Subscribe failed on {topic}: {message}")]
    SubscribeFailure { topic: String, message: String },

    /// Inbound payload on a recognised topic was not valid UTF-8
    #[error("Malformed inbound message on {topic}: {message}")]
    MalformedInbound { topic: String, message: String },

    /// The supervisor task is gone (host is shutting down)
    #[error("Supervisor stopped")]
    SupervisorStopped,

    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] crate::protocol::ValidationError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

impl RelayError {
    /// Create connect failure
    pub fn connect_failure<S: AsRef<str>>(message: S) -> Self {
        Self::ConnectFailure {
            message: sanitize_error_message(message.as_ref()),
        }
    }

    /// Create publish failure
    pub fn publish_failure<T: Into<String>, S: AsRef<str>>(topic: T, message: S) -> Self {
        Self::PublishFailure {
            topic: topic.into(),
            message: sanitize_error_message(message.as_ref()),
        }
    }

    /// Create subscribe failure
    pub fn subscribe_failure<T: Into<String>, S: AsRef<str>>(topic: T, message: S) -> Self {
        Self::SubscribeFailure {
            topic: topic.into(),
            message: sanitize_error_message(message.as_ref()),
        }
    }

    /// Create malformed inbound error
    pub fn malformed_inbound<T: Into<String>, S: Into<String>>(topic: T, message: S) -> Self {
        Self::MalformedInbound {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// True for the error returned when publishing while disconnected
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected { .. })
    }
}

/// Redact secrets from error text before it reaches a log line
///
/// Removes `password=...`-style pairs and `user:pass@` URL userinfo, and
/// truncates to 500 characters.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = URL_USERINFO_PATTERN
        .replace_all(&sanitized, "${1}***@")
        .to_string();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
