//! # crawlq core
//!
//! Error types and logging bootstrap shared by every crawlq crate.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
