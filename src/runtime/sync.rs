//! # Watch Startup
//!
//! Starts the pod and namespace watches and blocks until their initial lists
//! have been applied to the identity cache.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::{Api, Client};
use kube_runtime::watcher;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::store::PodIdentityCache;
use crate::watch::{spawn_informer, NamespaceWatchBridge, PodWatchBridge};

/// Watcher configuration for pods, limited to one node when `node_name` is set
pub fn pod_watcher_config(node_name: &str) -> watcher::Config {
    let config = watcher::Config::default();
    if node_name.is_empty() {
        config
    } else {
        config.fields(&format!("spec.nodeName={node_name}"))
    }
}

/// Start the pod and namespace watches, returning their sync signals
pub fn start_watches(
    client: &Client,
    config: &BrokerConfig,
    cache: &PodIdentityCache,
) -> Vec<watch::Receiver<bool>> {
    debug!(
        "Starting pod and namespace sync jobs with {}s resync period",
        config.cache_resync_period.as_secs()
    );

    let pods_synced = spawn_informer(
        "pods",
        Api::<Pod>::all(client.clone()),
        pod_watcher_config(&config.node_name),
        Arc::new(PodWatchBridge::new(cache.clone(), config)),
        config.cache_resync_period,
    );

    let namespaces_synced = spawn_informer(
        "namespaces",
        Api::<Namespace>::all(client.clone()),
        watcher::Config::default(),
        Arc::new(NamespaceWatchBridge::new(cache.clone(), config)),
        config.cache_resync_period,
    );

    vec![pods_synced, namespaces_synced]
}

/// Wait until every signal reports a completed initial sync
///
/// Each attempt is bounded by `attempt_timeout`. Exhausting `attempts` is an
/// error: serving without the initial mappings would treat every pod as unmapped.
pub async fn wait_for_cache_sync(
    signals: &mut [watch::Receiver<bool>],
    attempts: u32,
    attempt_timeout: Duration,
) -> Result<()> {
    for attempt in 1..=attempts {
        match tokio::time::timeout(attempt_timeout, all_synced(signals)).await {
            Ok(result) => {
                result?;
                info!("Caches have been synced. Proceeding with server.");
                return Ok(());
            }
            Err(_) => warn!(
                "Caches not synced after attempt {}/{} ({}s)",
                attempt,
                attempts,
                attempt_timeout.as_secs()
            ),
        }
    }

    Err(anyhow::anyhow!(
        "Attempted to wait for caches to be synced {} times however it is not done. Giving up.",
        attempts
    ))
}

async fn all_synced(signals: &mut [watch::Receiver<bool>]) -> Result<()> {
    for signal in signals.iter_mut() {
        signal
            .wait_for(|synced| *synced)
            .await
            .context("Watch stopped before its initial sync")?;
    }
    Ok(())
}
