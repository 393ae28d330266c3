//! Live fan-out of new log entries to connected observers.

pub mod bridge;

pub use bridge::{BridgeSettings, FanoutBridge};
