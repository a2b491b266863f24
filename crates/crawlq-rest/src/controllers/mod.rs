//! REST API controllers.

pub mod health_controller;
pub mod queue_controller;

pub use health_controller::*;
