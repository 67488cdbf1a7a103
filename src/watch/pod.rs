//! # Pod Watch Bridge
//!
//! Keeps the pod address -> role mappings in the identity cache in step with
//! the pod lifecycle.
//!
//! Every mapping records the UID of the pod that owns the address. When an
//! address is reused, the delete of the old pod only removes the mapping if it
//! still belongs to that pod, so a late delete cannot erase the new pod's
//! mapping.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, error, info, warn};

use super::EventHandler;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, StoreError};
use crate::iam::arn::role_arn;
use crate::observability::metrics;
use crate::store::{PodIdentity, PodIdentityCache};

const POD_PHASE_SUCCEEDED: &str = "Succeeded";
const POD_PHASE_FAILED: &str = "Failed";

/// Whether a pod should hold an address mapping
///
/// A pod is active when it has an address and has not terminated.
pub fn is_pod_active(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    let has_address = status.pod_ip.as_deref().is_some_and(|ip| !ip.is_empty());
    let terminated = matches!(
        status.phase.as_deref(),
        Some(POD_PHASE_SUCCEEDED) | Some(POD_PHASE_FAILED)
    );
    has_address && !terminated
}

/// Index function for the watch layer: the pod's address when active, nothing otherwise
pub fn pod_ip_index(pod: &Pod) -> Vec<String> {
    if !is_pod_active(pod) {
        return Vec::new();
    }
    pod_ip(pod).map(str::to_string).into_iter().collect()
}

fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|status| status.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or("Unknown")
}

fn uses_host_network(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.host_network)
        .unwrap_or(false)
}

fn annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// Writes and removes pod identity records in response to pod events
#[derive(Debug, Clone)]
pub struct PodWatchBridge {
    cache: PodIdentityCache,
    base_role_arn: String,
    default_role: String,
    iam_role_key: String,
    iam_external_id_key: String,
    resolve_duplicate_ips: bool,
}

impl PodWatchBridge {
    pub fn new(cache: PodIdentityCache, config: &BrokerConfig) -> Self {
        Self {
            cache,
            base_role_arn: config.base_role_arn.clone(),
            default_role: config.default_role.clone(),
            iam_role_key: config.iam_role_key.clone(),
            iam_external_id_key: config.iam_external_id_key.clone(),
            resolve_duplicate_ips: config.resolve_duplicate_ips,
        }
    }

    /// Fully-qualified role for a pod: its annotation, else the default role
    pub fn effective_role(&self, pod: &Pod) -> Result<String, BrokerError> {
        let role = annotation(pod, &self.iam_role_key)
            .or_else(|| (!self.default_role.is_empty()).then_some(self.default_role.as_str()))
            .ok_or_else(|| BrokerError::RoleNotResolved {
                address: pod_ip(pod).unwrap_or_default().to_string(),
            })?;
        Ok(role_arn(&self.base_role_arn, role))
    }

    /// Address under which the pod is indexed, if any
    pub fn indexed_address(&self, pod: &Pod) -> Option<String> {
        if self.resolve_duplicate_ips && uses_host_network(pod) {
            return None;
        }
        pod_ip_index(pod).into_iter().next()
    }

    async fn index_pod(&self, pod: &Pod) {
        let name = pod.metadata.name.as_deref().unwrap_or("unknown");
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();

        let Some(address) = self.indexed_address(pod) else {
            debug!(
                pod.name = %name,
                pod.namespace = %namespace,
                pod.phase = %pod_phase(pod),
                "Pod is not indexable, releasing any mapping it holds"
            );
            self.release_pod(pod).await;
            return;
        };

        let role = match self.effective_role(pod) {
            Ok(role) => role,
            Err(e) => {
                warn!(
                    pod.name = %name,
                    pod.namespace = %namespace,
                    pod.ip = %address,
                    "Unable to resolve a role for pod, leaving it unmapped: {}",
                    e
                );
                self.release_pod(pod).await;
                return;
            }
        };

        let mut identity = PodIdentity::new(&address, namespace, &role);
        identity.external_id = annotation(pod, &self.iam_external_id_key).map(str::to_string);
        identity.pod_uid = pod.metadata.uid.clone();

        match self.cache.put_identity(&identity).await {
            Ok(()) => info!(
                pod.name = %name,
                pod.namespace = %namespace,
                pod.ip = %address,
                pod.phase = %pod_phase(pod),
                pod.iam.role = %role,
                "Indexed pod"
            ),
            Err(e) => error!(
                pod.name = %name,
                pod.namespace = %namespace,
                pod.ip = %address,
                pod.iam.role = %role,
                "Failed to store pod mapping: {}",
                e
            ),
        }
    }

    /// Remove the mapping at the pod's address if the pod still owns it
    async fn release_pod(&self, pod: &Pod) {
        let Some(address) = pod_ip(pod) else {
            return;
        };
        let name = pod.metadata.name.as_deref().unwrap_or("unknown");

        let stored = match self.cache.get(address).await {
            Ok(stored) => stored,
            Err(StoreError::NotFound(_)) => return,
            Err(e) => {
                error!(pod.name = %name, pod.ip = %address, "Failed to read pod mapping: {}", e);
                return;
            }
        };

        let owned = match (stored.pod_uid.as_deref(), pod.metadata.uid.as_deref()) {
            (Some(stored_uid), Some(uid)) => stored_uid == uid,
            _ => true,
        };
        if !owned {
            debug!(
                pod.name = %name,
                pod.ip = %address,
                "Address was reused by another pod, keeping its mapping"
            );
            return;
        }

        match self.cache.delete(address).await {
            Ok(()) => info!(
                pod.name = %name,
                pod.namespace = %stored.namespace,
                pod.ip = %address,
                pod.phase = %pod_phase(pod),
                "Removed pod mapping"
            ),
            Err(e) => error!(pod.name = %name, pod.ip = %address, "Failed to remove pod mapping: {}", e),
        }
    }
}

#[async_trait]
impl EventHandler<Pod> for PodWatchBridge {
    async fn on_add(&self, pod: &Pod) {
        metrics::increment_watch_events("pod", "added");
        self.index_pod(pod).await;
    }

    async fn on_update(&self, old: &Pod, new: &Pod) {
        metrics::increment_watch_events("pod", "updated");
        if pod_ip(old).is_some() && pod_ip(old) != pod_ip(new) {
            self.release_pod(old).await;
        }
        self.index_pod(new).await;
    }

    async fn on_delete(&self, pod: &Pod) {
        metrics::increment_watch_events("pod", "deleted");
        if pod_ip(pod).is_none() {
            warn!(
                pod.name = %pod.metadata.name.as_deref().unwrap_or("unknown"),
                pod.namespace = %pod.metadata.namespace.as_deref().unwrap_or_default(),
                "Dropping delete event for pod without an address"
            );
            return;
        }
        self.release_pod(pod).await;
    }
}
