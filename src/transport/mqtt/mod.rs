//! MQTT transport for the pill box relay
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, reconnect policy and options
//! - [`message_handler`] - Pure event routing
//! - [`health_monitor`] - Pure state transitions and health metrics
//! - [`client`] - Impure I/O against the broker via `rumqttc`
//!
//! # Usage
//!
//! ```rust,no_run
//! use pillbox_relay::config::MqttSection;
//! use pillbox_relay::protocol::QualityLevel;
//! use pillbox_relay::transport::mqtt::{ConnectOptions, MqttClient};
//! use pillbox_relay::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let section = MqttSection::with_broker("tcp://localhost:1883");
//! let options = ConnectOptions::from_config(&section)?;
//!
//! let client = MqttClient::new();
//! let mut events = client.connect(&options).await?;
//! client.subscribe("esp32/startup", QualityLevel::AtLeastOnce).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{
    generate_client_id, parse_broker_url, BrokerAddress, ConnectOptions, ConnectionState,
    MqttError, ReconnectConfig,
};
pub use health_monitor::{
    ConnectionCounters, ConnectionEvent, ConnectionQuality, HealthMetrics, HealthMonitor,
    ReconnectionDecision,
};
pub use message_handler::{EventRoute, MessageHandler};
