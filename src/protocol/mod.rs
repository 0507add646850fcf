//! Wire protocol shared with the ESP32 pill box firmware
//!
//! Typed commands, payload shapes, inbound events and the fixed topic table.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
