//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that handle
//! log format and level parsing from environment variables.

use pillbox_relay::error::sanitize_error_message;
use pillbox_relay::observability::logging::{build_filter, LogFormat};
use pillbox_relay::observability::{init_logging, parse_level};
use tracing::Level;

#[test]
fn test_log_format_parse_json() {
    assert!(matches!(LogFormat::parse("json"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("JSON"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("Json"), LogFormat::Json));
}

#[test]
fn test_log_format_parse_pretty_and_compact() {
    assert!(matches!(LogFormat::parse("pretty"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("PRETTY"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("compact"), LogFormat::Compact));
    assert!(matches!(LogFormat::parse("Compact"), LogFormat::Compact));
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Invalid formats should default to JSON for production safety
    assert!(matches!(LogFormat::parse("invalid"), LogFormat::Json));
    assert!(matches!(LogFormat::parse(""), LogFormat::Json));
    assert!(matches!(LogFormat::parse("xml"), LogFormat::Json));
}

#[test]
fn test_log_format_parse_whitespace() {
    assert!(matches!(LogFormat::parse("  pretty  "), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("compact\n"), LogFormat::Compact));
    assert!(matches!(LogFormat::parse("\tjson"), LogFormat::Json));
}

#[test]
fn test_log_level_parsing() {
    let test_cases = vec![
        ("ERROR", Level::ERROR),
        ("warn", Level::WARN),
        ("Info", Level::INFO),
        ("DEBUG", Level::DEBUG),
        ("trace", Level::TRACE),
        ("verbose", Level::INFO),
        ("", Level::INFO),
    ];

    for (input, expected) in test_cases {
        assert_eq!(parse_level(input), expected, "Failed for input: {input}");
    }
}

#[test]
fn test_filter_quiets_dependencies() {
    std::env::remove_var("RUST_LOG");
    let filter = build_filter(Level::DEBUG).to_string();

    assert!(filter.contains("debug"));
    assert!(filter.contains("rumqttc=warn"));
    assert!(filter.contains("warp=warn"));
}

#[test]
fn test_init_logging_is_idempotent() {
    init_logging(Level::INFO, LogFormat::Compact, false);
    init_logging(Level::DEBUG, LogFormat::Json, true);
    tracing::info!("logging initialised twice without panicking");
}

#[test]
fn test_error_messages_are_sanitized_before_logging() {
    let sanitized = sanitize_error_message("connect failed: password=hunter2 rejected");
    assert!(!sanitized.contains("hunter2"));

    let long = "x".repeat(2_000);
    assert!(sanitize_error_message(&long).len() < long.len());
}
