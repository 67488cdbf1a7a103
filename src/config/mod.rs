//! # Broker Configuration
//!
//! Broker-level configuration loaded from environment variables (populated from ConfigMap).
//!
//! All configuration has defaults and can be overridden via environment variables.
//! The binary additionally accepts a handful of command-line overrides.

mod broker;
mod duration;

pub use broker::{BrokerConfig, NamespaceRestrictionFormat};
pub use duration::parse_duration;
