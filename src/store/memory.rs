//! # In-Memory Identity Store
//!
//! Process-local backend for the identity store contract.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Fields, IdentityStore, StoreKey};
use crate::error::StoreError;

/// Identity store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    records: RwLock<HashMap<StoreKey, Fields>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all sets
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn put(&self, key: &StoreKey, fields: Fields) -> Result<(), StoreError> {
        self.records.write().await.insert(key.clone(), fields);
        debug!("Store key set: {}", key);
        Ok(())
    }

    async fn get(&self, key: &StoreKey) -> Result<Fields, StoreError> {
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &StoreKey) -> Result<(), StoreError> {
        let existed = self.records.write().await.remove(key).is_some();
        debug!("Store key deleted: {} (existed: {})", key, existed);
        Ok(())
    }
}
