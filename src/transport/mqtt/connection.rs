//! Pure connection state management for the MQTT transport
//!
//! This module contains the connection state enum, the reconnect policy,
//! broker address parsing, client identifier generation and construction of
//! `rumqttc` options from resolved connect settings.

use crate::config::{Credentials, MqttSection};
use rumqttc::MqttOptions;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Default MQTT port when the broker URL omits one
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Connection state owned by the connection supervisor
///
/// `Connected` and `Disconnected` are rest states; `Connecting` and
/// `ReconnectPending` are transient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    ReconnectPending,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::ReconnectPending => "reconnect_pending",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconnection policy
///
/// The device-facing relay uses a constant delay between a connection loss
/// (or failed attempt) and the next attempt, with unlimited retries.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before each reconnect attempt
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectConfig {
    pub fn constant(delay: Duration) -> Self {
        Self { delay }
    }

    /// Delay before the next reconnect attempt
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Transport has no open session")]
    NoSession,
}

/// Host and port extracted from a broker URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

/// Parse `tcp://host:port` or `mqtt://host:port`
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, MqttError> {
    let url = Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    if !matches!(url.scheme(), "tcp" | "mqtt") {
        return Err(MqttError::InvalidBrokerUrl(format!(
            "unsupported scheme '{}' in {broker_url}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    Ok(BrokerAddress {
        host: host.to_string(),
        port: url.port().unwrap_or(DEFAULT_MQTT_PORT),
    })
}

/// Generate a client identifier unique to this process instance
///
/// Format: `<prefix>-<unix millis>-<8 hex chars>`.
pub fn generate_client_id(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{timestamp}-{}", &suffix[..8])
}

/// Fully resolved settings for one connect attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub broker: BrokerAddress,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub clean_session: bool,
    pub keep_alive: Duration,
}

impl ConnectOptions {
    /// Resolve options from configuration
    ///
    /// Generates the client identifier and reads credentials from the
    /// environment variables named in the config.
    pub fn from_config(config: &MqttSection) -> Result<Self, MqttError> {
        Ok(Self {
            broker: parse_broker_url(&config.broker_url)?,
            client_id: generate_client_id(&config.client_id_prefix),
            credentials: config.credentials(),
            clean_session: config.clean_session,
            keep_alive: config.keep_alive(),
        })
    }
}

/// Build `rumqttc` options from resolved connect settings
pub fn configure_mqtt_options(options: &ConnectOptions) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(
        options.client_id.clone(),
        options.broker.host.clone(),
        options.broker.port,
    );

    if let Some(credentials) = &options.credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_clean_session(options.clean_session);

    mqtt_options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_config_default_is_constant_five_seconds() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay(), Duration::from_secs(5));
        assert_eq!(
            ReconnectConfig::constant(Duration::from_millis(250)).delay(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_parse_broker_url() {
        let address = parse_broker_url("tcp://87.248.152.126:1883").unwrap();
        assert_eq!(address.host, "87.248.152.126");
        assert_eq!(address.port, 1883);

        let address = parse_broker_url("mqtt://broker.local").unwrap();
        assert_eq!(address.host, "broker.local");
        assert_eq!(address.port, DEFAULT_MQTT_PORT);

        let address = parse_broker_url("tcp://localhost:11883").unwrap();
        assert_eq!(address.port, 11883);
    }

    #[test]
    fn test_invalid_broker_url() {
        assert!(matches!(
            parse_broker_url("invalid-url"),
            Err(MqttError::InvalidBrokerUrl(_))
        ));
        assert!(matches!(
            parse_broker_url("http://localhost:1883"),
            Err(MqttError::InvalidBrokerUrl(_))
        ));
        assert!(parse_broker_url("").is_err());
    }

    #[test]
    fn test_client_id_format_and_uniqueness() {
        let first = generate_client_id("AndroidClient");
        let second = generate_client_id("AndroidClient");

        assert!(first.starts_with("AndroidClient-"));
        assert_ne!(first, second);

        let parts: Vec<&str> = first.rsplitn(2, '-').collect();
        assert_eq!(parts[0].len(), 8);
        assert!(parts[0].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_connect_options_from_config() {
        let mut section = MqttSection::with_broker("tcp://localhost:1883");
        section.client_id_prefix = "pillbox".to_string();
        section.clean_session = true;
        section.keep_alive_secs = 30;

        let options = ConnectOptions::from_config(&section).unwrap();
        assert_eq!(options.broker.host, "localhost");
        assert_eq!(options.broker.port, 1883);
        assert!(options.client_id.starts_with("pillbox-"));
        assert!(options.clean_session);
        assert_eq!(options.keep_alive, Duration::from_secs(30));
        assert!(options.credentials.is_none());
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = ConnectOptions {
            broker: BrokerAddress {
                host: "localhost".to_string(),
                port: 1883,
            },
            client_id: "AndroidClient-1-abcdef01".to_string(),
            credentials: Some(Credentials {
                username: "user".to_string(),
                password: "pass".to_string(),
            }),
            clean_session: false,
            keep_alive: Duration::from_secs(60),
        };

        let mqtt_options = configure_mqtt_options(&options);
        assert_eq!(mqtt_options.client_id(), "AndroidClient-1-abcdef01");
        assert_eq!(
            mqtt_options.broker_address(),
            ("localhost".to_string(), 1883)
        );
        assert_eq!(mqtt_options.keep_alive(), Duration::from_secs(60));
        assert!(!mqtt_options.clean_session());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::ReconnectPending.to_string(),
            "reconnect_pending"
        );
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string().into()),
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::NoSession,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
