//! Core types and traits for the link tester
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{
    LinkState, MetricSnapshot, MonitorConfig, SigningConfig, StreamRates, Summary,
};

/// Default MAVLink UDP port
pub const DEFAULT_PORT: u16 = 14550;

/// System id used for outgoing ground-station traffic
pub const GCS_SYSTEM_ID: u8 = 255;

/// Component id used for outgoing ground-station traffic
pub const GCS_COMPONENT_ID: u8 = 0;
