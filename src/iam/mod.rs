//! # IAM
//!
//! Role identifiers, caller-to-role resolution and credential minting.
//!
//! - `arn` - structural validation and prefixing of role ARNs
//! - `resolver` - caller address -> role, with namespace allow-lists
//! - `sts` - the STS collaborator and endpoint selection
//! - `broker` - role-keyed credential cache with single-flight fetches

pub mod arn;
pub mod broker;
pub mod resolver;
pub mod sts;

pub use broker::{CachedCredential, CredentialBroker};
pub use resolver::{RoleMapping, RoleResolver};
pub use sts::{AssumeRoleRequest, AwsStsClient, IssuedCredentials, StsClient};
