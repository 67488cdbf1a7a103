//! # kube-iam-broker
//!
//! Per-pod IAM credential broker that impersonates the instance metadata
//! service for Kubernetes workloads.
//!
//! Pod events keep an address -> role cache current ([`watch`], [`store`]).
//! Metadata requests are resolved against that cache, checked against the
//! namespace allow-lists and answered with role credentials minted through STS
//! ([`iam`], [`server`]). Everything else is relayed to the real metadata
//! service.

pub mod config;
pub mod constants;
pub mod error;
pub mod iam;
pub mod observability;
pub mod runtime;
pub mod server;
pub mod store;
pub mod watch;

pub use error::{BrokerError, StoreError};
