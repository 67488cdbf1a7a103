//! # Observability
//!
//! Prometheus metrics and the probe server.

pub mod metrics;
pub mod server;

pub use server::{start_server, ServerState};
