//! # crawlq REST
//!
//! HTTP surface of the job queue: the enqueue gateway, metrics and health
//! reads, dead-letter inspection and the OpenAPI document.

pub mod controllers;
pub mod middleware;
pub mod openapi;
pub mod responses;
pub mod router;
pub mod state;

pub use router::*;
pub use state::*;
