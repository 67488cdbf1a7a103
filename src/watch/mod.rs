//! # Watch
//!
//! Pod and namespace lifecycle handling.
//!
//! The informer adapter turns the kube-runtime watcher stream into a closed set
//! of [`WatchEvent`] variants, queues them, and hands them one at a time to an
//! [`EventHandler`]. Handlers never run concurrently with each other.
//!
//! - `pod` - [`PodWatchBridge`], keeps pod address -> role mappings current
//! - `namespace` - [`NamespaceWatchBridge`], keeps namespace allow-lists current
//! - `informer` - watcher stream -> queued events, relist bookkeeping, resync, sync signal

pub mod informer;
pub mod namespace;
pub mod pod;

use async_trait::async_trait;

pub use informer::{spawn_informer, InformerState, Notification};
pub use namespace::{allowed_roles, NamespaceWatchBridge};
pub use pod::{is_pod_active, pod_ip_index, PodWatchBridge};

/// A lifecycle change of one watched object
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Updated { old: K, new: K },
    /// Carries the last known state of the deleted object
    Deleted(K),
}

impl<K> WatchEvent<K> {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated { .. } => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

/// Receiver of watch events
#[async_trait]
pub trait EventHandler<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn on_add(&self, obj: &K);
    async fn on_update(&self, old: &K, new: &K);
    async fn on_delete(&self, obj: &K);

    /// Route an event to the matching callback
    async fn handle(&self, event: &WatchEvent<K>) {
        match event {
            WatchEvent::Added(obj) => self.on_add(obj).await,
            WatchEvent::Updated { old, new } => self.on_update(old, new).await,
            WatchEvent::Deleted(obj) => self.on_delete(obj).await,
        }
    }
}
