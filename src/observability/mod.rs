//! Observability for the pill box relay
//!
//! Structured logging, process-wide metrics and an optional HTTP health
//! endpoint.

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

pub use logging::{lifecycle_span, mqtt_span, relay_span, schedule_span};
