//! # Informer Adapter
//!
//! Drives a kube-runtime watcher and delivers its changes to an [`EventHandler`].
//!
//! The watcher stream reports whole-object states (`Apply`, `Delete`) and
//! relists (`Init` .. `InitDone`). [`InformerState`] keeps the last known state
//! of every object so those can be turned into `Added`, `Updated` and
//! `Deleted(last known)` events, including deletes that happened while the watch
//! was disconnected and only show up as objects missing from a relist.
//!
//! Events go through a bounded queue to a single consumer task, so the handler
//! sees them strictly in order and one at a time.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::{pin_mut, StreamExt};
use kube::{Api, Resource};
use kube_runtime::watcher;
use kube_runtime::WatchStreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{EventHandler, WatchEvent};
use crate::constants::WATCH_EVENT_QUEUE_CAPACITY;

/// Item delivered through the informer queue
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<K> {
    Event(WatchEvent<K>),
    /// Every event of the initial list has been queued ahead of this marker
    Synced,
}

/// Last known state of every watched object
#[derive(Debug)]
pub struct InformerState<K> {
    known: BTreeMap<String, K>,
    /// Keys seen by the relist in progress, if any
    relist: Option<HashSet<String>>,
}

impl<K> Default for InformerState<K> {
    fn default() -> Self {
        Self {
            known: BTreeMap::new(),
            relist: None,
        }
    }
}

impl<K> InformerState<K>
where
    K: Resource + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Translate one watcher event into handler events
    pub fn apply(&mut self, event: watcher::Event<K>) -> Vec<Notification<K>> {
        match event {
            watcher::Event::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                let Some(key) = object_key(&obj) else {
                    warn!("Ignoring listed object without a name");
                    return Vec::new();
                };
                if let Some(seen) = self.relist.as_mut() {
                    seen.insert(key.clone());
                }
                vec![Notification::Event(self.upsert(key, obj))]
            }
            watcher::Event::InitDone => {
                let mut notifications = Vec::new();
                if let Some(seen) = self.relist.take() {
                    let vanished: Vec<String> = self
                        .known
                        .keys()
                        .filter(|key| !seen.contains(*key))
                        .cloned()
                        .collect();
                    for key in vanished {
                        if let Some(last_known) = self.known.remove(&key) {
                            debug!("Object {} disappeared during relist", key);
                            notifications.push(Notification::Event(WatchEvent::Deleted(last_known)));
                        }
                    }
                }
                notifications.push(Notification::Synced);
                notifications
            }
            watcher::Event::Apply(obj) => {
                let Some(key) = object_key(&obj) else {
                    warn!("Ignoring watched object without a name");
                    return Vec::new();
                };
                vec![Notification::Event(self.upsert(key, obj))]
            }
            watcher::Event::Delete(obj) => {
                let Some(key) = object_key(&obj) else {
                    warn!("Dropping delete event for an object without a name");
                    return Vec::new();
                };
                self.known.remove(&key);
                vec![Notification::Event(WatchEvent::Deleted(obj))]
            }
        }
    }

    /// Replay every known object as an update
    pub fn resync(&self) -> Vec<Notification<K>> {
        self.known
            .values()
            .map(|obj| {
                Notification::Event(WatchEvent::Updated {
                    old: obj.clone(),
                    new: obj.clone(),
                })
            })
            .collect()
    }

    fn upsert(&mut self, key: String, obj: K) -> WatchEvent<K> {
        match self.known.insert(key, obj.clone()) {
            Some(old) => WatchEvent::Updated { old, new: obj },
            None => WatchEvent::Added(obj),
        }
    }
}

fn object_key<K: Resource>(obj: &K) -> Option<String> {
    let meta = obj.meta();
    let name = meta.name.as_deref()?;
    Some(match meta.namespace.as_deref() {
        Some(namespace) => format!("{namespace}/{name}"),
        None => name.to_string(),
    })
}

/// Start watching `api` and feeding `handler`
///
/// Returns a receiver that turns `true` once the initial list has been fully
/// processed by the handler.
pub fn spawn_informer<K>(
    resource: &'static str,
    api: Api<K>,
    config: watcher::Config,
    handler: Arc<dyn EventHandler<K>>,
    resync_period: Duration,
) -> watch::Receiver<bool>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel(WATCH_EVENT_QUEUE_CAPACITY);
    let (synced_tx, synced_rx) = watch::channel(false);

    tokio::spawn(consume(resource, rx, handler, synced_tx));

    tokio::spawn(async move {
        let mut state = InformerState::new();
        let stream = watcher(api, config).default_backoff();
        pin_mut!(stream);

        let mut resync = tokio::time::interval_at(Instant::now() + resync_period, resync_period);

        loop {
            let notifications = tokio::select! {
                event = stream.next() => match event {
                    Some(Ok(event)) => state.apply(event),
                    Some(Err(e)) => {
                        warn!("Error watching {}: {}", resource, e);
                        continue;
                    }
                    None => {
                        warn!("{} watch stream ended", resource);
                        return;
                    }
                },
                _ = resync.tick() => {
                    debug!("Resyncing {} {} objects", state.len(), resource);
                    state.resync()
                }
            };

            for notification in notifications {
                if tx.send(notification).await.is_err() {
                    warn!("{} event consumer stopped", resource);
                    return;
                }
            }
        }
    });

    synced_rx
}

async fn consume<K>(
    resource: &'static str,
    mut rx: mpsc::Receiver<Notification<K>>,
    handler: Arc<dyn EventHandler<K>>,
    synced: watch::Sender<bool>,
) where
    K: Send + Sync + 'static,
{
    while let Some(notification) = rx.recv().await {
        match notification {
            Notification::Event(event) => handler.handle(&event).await,
            Notification::Synced => {
                if !*synced.borrow() {
                    info!("{} watch cache synced", resource);
                }
                synced.send_replace(true);
            }
        }
    }
}
