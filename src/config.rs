//! Configuration system for the pill box relay
//!
//! Broker settings, reconnect policy, and the pill box schedule are loaded from
//! a TOML file. Credentials are never stored in the file itself: the file names
//! the environment variables that hold them, and they are resolved at connect time.

use crate::transport::mqtt::connection::parse_broker_url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default locations searched when no `--config` is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["pillbox.toml", "config/pillbox.toml"];

/// Main relay configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub mqtt: MqttSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub boxes: Vec<PillBoxConfig>,
}

/// MQTT broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `tcp://host:port` or `mqtt://host:port`
    pub broker_url: String,
    /// Prefix for the generated per-process client identifier
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Resume the broker-side session when false
    #[serde(default)]
    pub clean_session: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Fixed delay between a connection loss and the next attempt
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_client_id_prefix() -> String {
    "AndroidClient".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_keep_alive() -> u64 {
    60
}

fn default_reconnect_delay() -> u64 {
    5
}

impl MqttSection {
    /// Section with defaults for everything except the broker URL
    pub fn with_broker(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            client_id_prefix: default_client_id_prefix(),
            username_env: None,
            password_env: None,
            clean_session: false,
            connect_timeout_secs: default_connect_timeout(),
            keep_alive_secs: default_keep_alive(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Resolve credentials from the configured environment variables
    ///
    /// Returns `None` when no username variable is configured or it is unset.
    /// A missing password resolves to an empty string.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = get_env_var_optional(self.username_env.as_ref())?;
        let password = get_env_var_optional(self.password_env.as_ref()).unwrap_or_default();
        Some(Credentials { username, password })
    }

    /// Validate broker URL and timing values
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_broker_url(&self.broker_url)
            .map_err(|e| ConfigError::InvalidConfig(format!("mqtt.broker_url: {e}")))?;

        if self.client_id_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id_prefix must not be empty".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        // rumqttc rejects keep-alive values below 5 seconds
        if self.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be at least 5".to_string(),
            ));
        }
        if self.reconnect_delay_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.reconnect_delay_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Username/password pair; the password never appears in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Schedule loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleSection {
    /// How often the schedule evaluator checks for due doses
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

fn default_tick_interval() -> u64 {
    30
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
        }
    }
}

/// One pill box compartment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PillBoxConfig {
    pub id: u32,
    /// GPIO pin of the box LED on the ESP32
    pub pin: u8,
    /// Dosing period in seconds
    pub period_secs: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mqtt.validate()?;

        if self.schedule.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "schedule.tick_interval_secs must be greater than 0".to_string(),
            ));
        }

        validate_boxes(&self.boxes)
    }

    /// Require the credentials to be present in the environment
    pub fn require_credentials(&self) -> Result<Credentials, ConfigError> {
        let username_env = self.mqtt.username_env.as_deref().ok_or_else(|| {
            ConfigError::InvalidConfig("mqtt.username_env is not configured".to_string())
        })?;
        let username = get_env_var_required(username_env)?;
        let password = match self.mqtt.password_env.as_deref() {
            Some(name) => get_env_var_required(name)?,
            None => String::new(),
        };
        Ok(Credentials { username, password })
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mqtt]
broker_url = "tcp://localhost:1883"

[[boxes]]
id = 1
pin = 19
period_secs = 60

[[boxes]]
id = 2
pin = 21
period_secs = 120
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn validate_boxes(boxes: &[PillBoxConfig]) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();
    let mut pins = HashSet::new();

    for pill_box in boxes {
        if !ids.insert(pill_box.id) {
            return Err(ConfigError::InvalidConfig(format!(
                "duplicate pill box id {}",
                pill_box.id
            )));
        }
        if !pins.insert(pill_box.pin) {
            return Err(ConfigError::InvalidConfig(format!(
                "pin {} is assigned to more than one pill box",
                pill_box.pin
            )));
        }
        if pill_box.period_secs == 0 {
            return Err(ConfigError::InvalidConfig(format!(
                "pill box {} has a zero dosing period",
                pill_box.id
            )));
        }
    }

    Ok(())
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}
