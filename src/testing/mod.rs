//! Testing utilities and mock implementations
//!
//! This module provides mock implementations for exercising the relay without
//! an MQTT broker or a user-facing notification surface.

pub mod mocks;

pub use mocks::*;
