//! # crawlq config
//!
//! Typed configuration for the queue service.
//! Values are layered from TOML files and `CRAWLQ__*` environment variables,
//! then validated as a whole before startup continues.

mod app_config;
mod loader;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use validation::*;
