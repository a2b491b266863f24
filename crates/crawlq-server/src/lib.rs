//! # crawlq server
//!
//! Wires configuration, logging, the Prometheus recorder, the queue service
//! and the HTTP router into one process, and runs the ordered shutdown.

pub mod app;
pub mod processor;
pub mod startup;
