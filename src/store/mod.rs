//! # Identity Store
//!
//! The persistent key-value collaborator holding pod identities and namespace
//! policies, and the typed cache built on top of it.
//!
//! - `IdentityStore` - backend contract (`put`/`get`/`delete` of field maps)
//! - `MemoryIdentityStore` - in-process backend
//! - `PodIdentityCache` - typed records validated at write time

mod identity_cache;
mod memory;

pub use identity_cache::{NamespaceRolePolicy, PodIdentity, PodIdentityCache};
pub use memory::MemoryIdentityStore;

use async_trait::async_trait;

use crate::error::StoreError;

/// Record families kept by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordSet {
    /// Keyed by pod address
    Pods,
    /// Keyed by namespace name
    Namespaces,
}

impl RecordSet {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSet::Pods => "pods",
            RecordSet::Namespaces => "namespaces",
        }
    }
}

/// Key of a stored record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub set: RecordSet,
    pub key: String,
}

impl StoreKey {
    pub fn pod(address: &str) -> Self {
        Self {
            set: RecordSet::Pods,
            key: address.to_string(),
        }
    }

    pub fn namespace(name: &str) -> Self {
        Self {
            set: RecordSet::Namespaces,
            key: name.to_string(),
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.set.as_str(), self.key)
    }
}

/// Field map of a stored record
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Persistent identity store
///
/// Writes are per-key atomic with last-write-wins semantics; no ordering is
/// guaranteed between concurrent writers of the same key.
#[async_trait]
pub trait IdentityStore: Send + Sync + std::fmt::Debug {
    /// Upsert a record. Records never expire.
    async fn put(&self, key: &StoreKey, fields: Fields) -> Result<(), StoreError>;

    /// Fetch a record, failing with `StoreError::NotFound` if absent
    async fn get(&self, key: &StoreKey) -> Result<Fields, StoreError>;

    /// Remove a record. Removing an absent key succeeds.
    async fn delete(&self, key: &StoreKey) -> Result<(), StoreError>;
}
