//! # Namespace Watch Bridge
//!
//! Keeps namespace role allow-lists in the identity cache in step with the
//! namespace annotations.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use tracing::{error, info, warn};

use super::EventHandler;
use crate::config::BrokerConfig;
use crate::observability::metrics;
use crate::store::{NamespaceRolePolicy, PodIdentityCache};

/// Role patterns carried by the allow-list annotation of a namespace
///
/// The annotation holds a JSON array of strings. A missing annotation yields an
/// empty list; malformed JSON is logged and also yields an empty list.
pub fn allowed_roles(namespace: &Namespace, key: &str) -> Vec<String> {
    let Some(raw) = namespace
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
    else {
        return Vec::new();
    };

    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(roles) => roles,
        Err(e) => {
            warn!(
                namespace = %namespace.metadata.name.as_deref().unwrap_or("unknown"),
                "Ignoring malformed {} annotation: {}",
                key,
                e
            );
            Vec::new()
        }
    }
}

/// Writes and removes namespace role policies in response to namespace events
#[derive(Debug, Clone)]
pub struct NamespaceWatchBridge {
    cache: PodIdentityCache,
    namespace_key: String,
}

impl NamespaceWatchBridge {
    pub fn new(cache: PodIdentityCache, config: &BrokerConfig) -> Self {
        Self {
            cache,
            namespace_key: config.namespace_key.clone(),
        }
    }

    async fn store_policy(&self, namespace: &Namespace) {
        let Some(name) = namespace.metadata.name.as_deref() else {
            warn!("Dropping namespace event without a name");
            return;
        };

        let policy = NamespaceRolePolicy::new(name, allowed_roles(namespace, &self.namespace_key));
        match self.cache.put_policy(&policy).await {
            Ok(()) => info!(
                namespace = %name,
                roles = ?policy.allowed_roles,
                "Stored namespace role policy"
            ),
            Err(e) => error!(namespace = %name, "Failed to store namespace role policy: {}", e),
        }
    }
}

#[async_trait]
impl EventHandler<Namespace> for NamespaceWatchBridge {
    async fn on_add(&self, namespace: &Namespace) {
        metrics::increment_watch_events("namespace", "added");
        self.store_policy(namespace).await;
    }

    async fn on_update(&self, _old: &Namespace, new: &Namespace) {
        metrics::increment_watch_events("namespace", "updated");
        self.store_policy(new).await;
    }

    async fn on_delete(&self, namespace: &Namespace) {
        metrics::increment_watch_events("namespace", "deleted");
        let Some(name) = namespace.metadata.name.as_deref() else {
            warn!("Dropping namespace delete event without a name");
            return;
        };
        match self.cache.delete_policy(name).await {
            Ok(()) => info!(namespace = %name, "Removed namespace role policy"),
            Err(e) => error!(namespace = %name, "Failed to remove namespace role policy: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryIdentityStore;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const KEY: &str = "iam.amazonaws.com/allowed-roles";

    fn namespace(name: &str, annotation: Option<&str>) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: annotation
                    .map(|value| BTreeMap::from([(KEY.to_string(), value.to_string())])),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        }
    }

    #[test]
    fn test_allowed_roles_parsing() {
        assert_eq!(
            allowed_roles(&namespace("billing", Some(r#"["billing-*","reader"]"#)), KEY),
            vec!["billing-*".to_string(), "reader".to_string()]
        );
        assert!(allowed_roles(&namespace("billing", None), KEY).is_empty());
        assert!(allowed_roles(&namespace("billing", Some("billing-*")), KEY).is_empty());
    }

    #[tokio::test]
    async fn test_policy_follows_namespace_lifecycle() {
        let cache = PodIdentityCache::new(Arc::new(MemoryIdentityStore::new()));
        let bridge = NamespaceWatchBridge::new(cache.clone(), &BrokerConfig::default());

        let old = namespace("billing", Some(r#"["billing-*"]"#));
        bridge.on_add(&old).await;
        assert_eq!(
            cache.get_policy("billing").await.unwrap().allowed_roles,
            vec!["billing-*".to_string()]
        );

        let new = namespace("billing", Some(r#"["billing-reader"]"#));
        bridge.on_update(&old, &new).await;
        assert_eq!(
            cache.get_policy("billing").await.unwrap().allowed_roles,
            vec!["billing-reader".to_string()]
        );

        bridge.on_delete(&new).await;
        assert!(matches!(
            cache.get_policy("billing").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
