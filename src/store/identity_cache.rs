//! # Pod Identity Cache
//!
//! Typed view over the identity store: pod address -> (namespace, role) and
//! namespace -> allowed roles.
//!
//! Records are validated before they are written and decoded into fixed schemas
//! when read. The cache holds no lock of its own; concurrent writers of the same
//! address race inside the store with last-write-wins semantics.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{Fields, IdentityStore, StoreKey};
use crate::error::StoreError;

/// Role assignment of one pod address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodIdentity {
    pub address: String,
    pub namespace: String,
    /// Fully-qualified role ARN
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// UID of the pod owning the address when the record was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_uid: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl PodIdentity {
    pub fn new(address: &str, namespace: &str, role: &str) -> Self {
        Self {
            address: address.to_string(),
            namespace: namespace.to_string(),
            role: role.to_string(),
            external_id: None,
            pod_uid: None,
            last_updated: Utc::now(),
        }
    }

    fn validate(&self) -> Result<(), StoreError> {
        let invalid = |reason: &str| StoreError::InvalidRecord {
            key: self.address.clone(),
            reason: reason.to_string(),
        };
        if self.address.parse::<IpAddr>().is_err() {
            return Err(invalid("address is not an IP address"));
        }
        if self.namespace.is_empty() {
            return Err(invalid("namespace is empty"));
        }
        if self.role.is_empty() {
            return Err(invalid("role is empty"));
        }
        Ok(())
    }
}

/// Roles the pods of a namespace may assume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRolePolicy {
    pub namespace: String,
    /// Glob or regexp patterns, depending on the configured restriction format
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

impl NamespaceRolePolicy {
    pub fn new(namespace: &str, allowed_roles: Vec<String>) -> Self {
        Self {
            namespace: namespace.to_string(),
            allowed_roles,
            last_updated: Utc::now(),
        }
    }
}

/// Typed client over the identity store, shared by the watch bridges and the resolver
#[derive(Debug, Clone)]
pub struct PodIdentityCache {
    store: Arc<dyn IdentityStore>,
}

impl PodIdentityCache {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Upsert the mapping for a pod address
    pub async fn put(&self, address: &str, namespace: &str, role: &str) -> Result<(), StoreError> {
        self.put_identity(&PodIdentity::new(address, namespace, role))
            .await
    }

    /// Upsert a complete identity record
    pub async fn put_identity(&self, identity: &PodIdentity) -> Result<(), StoreError> {
        identity.validate()?;
        let key = StoreKey::pod(&identity.address);
        self.store.put(&key, encode(&key, identity)?).await
    }

    /// Mapping for a pod address, or `StoreError::NotFound`
    pub async fn get(&self, address: &str) -> Result<PodIdentity, StoreError> {
        let key = StoreKey::pod(address);
        let identity: PodIdentity = decode(&key, self.store.get(&key).await?)?;
        debug!(
            "Found role: {} namespace: {} for address: {}",
            identity.role, identity.namespace, address
        );
        Ok(identity)
    }

    /// Remove the mapping for a pod address; absent addresses are not an error
    pub async fn delete(&self, address: &str) -> Result<(), StoreError> {
        self.store.delete(&StoreKey::pod(address)).await
    }

    pub async fn put_policy(&self, policy: &NamespaceRolePolicy) -> Result<(), StoreError> {
        if policy.namespace.is_empty() {
            return Err(StoreError::InvalidRecord {
                key: String::new(),
                reason: "namespace is empty".to_string(),
            });
        }
        let key = StoreKey::namespace(&policy.namespace);
        self.store.put(&key, encode(&key, policy)?).await
    }

    pub async fn get_policy(&self, namespace: &str) -> Result<NamespaceRolePolicy, StoreError> {
        let key = StoreKey::namespace(namespace);
        decode(&key, self.store.get(&key).await?)
    }

    pub async fn delete_policy(&self, namespace: &str) -> Result<(), StoreError> {
        self.store.delete(&StoreKey::namespace(namespace)).await
    }
}

fn encode<T: Serialize>(key: &StoreKey, record: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(record) {
        Ok(serde_json::Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(StoreError::InvalidRecord {
            key: key.to_string(),
            reason: "record is not a field map".to_string(),
        }),
        Err(e) => Err(StoreError::InvalidRecord {
            key: key.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn decode<T: DeserializeOwned>(key: &StoreKey, fields: Fields) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::Object(fields)).map_err(|e| {
        error!("Failed to decode record {}: {}", key, e);
        StoreError::InvalidRecord {
            key: key.to_string(),
            reason: e.to_string(),
        }
    })
}
