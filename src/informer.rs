//! Informer: mirrors watched objects into a [`ResourceCache`] and emits events
//!
//! kube-rs watchers produce raw `Apply`/`Delete` events plus `Init*` markers around
//! every (re)list. The informer folds those into the cache and turns them into
//! [`ResourceEvent`]s:
//!
//! - first sight of a key is `Added`, later sights are `Updated`
//! - deletes carry the last known version of the object
//! - keys that vanish across a re-list (watch outage) become `Deleted`
//!
//! The cache is marked synced once the first list completes.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{object_key, ResourceCache};

/// Normalized store notification
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent<K> {
    /// Object seen for the first time
    Added(Arc<K>),
    /// Object changed
    Updated {
        /// Previously cached version
        old: Arc<K>,
        /// New version
        new: Arc<K>,
    },
    /// Object removed; carries the last known version
    Deleted(Arc<K>),
}

impl<K> ResourceEvent<K> {
    /// The object the event is about (the new version for updates)
    pub fn object(&self) -> &Arc<K> {
        match self {
            ResourceEvent::Added(obj) => obj,
            ResourceEvent::Updated { new, .. } => new,
            ResourceEvent::Deleted(obj) => obj,
        }
    }

    /// Short event kind, used for logging and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceEvent::Added(_) => "added",
            ResourceEvent::Updated { .. } => "updated",
            ResourceEvent::Deleted(_) => "deleted",
        }
    }
}

/// Receiver of informer events
///
/// Called on the watch task; implementations must not block.
pub trait ResourceEventHandler<K>: Send + Sync {
    /// Handle one event
    fn on_event(&self, event: ResourceEvent<K>);
}

/// Build the watch stream for `api`, with kube-rs default backoff on errors
pub fn watch_stream<K>(
    api: Api<K>,
    config: watcher::Config,
) -> impl Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher(api, config).default_backoff()
}

/// Folds watcher events into a cache
pub struct Informer<K> {
    cache: Arc<ResourceCache<K>>,
    /// Keys seen during an in-progress (re)list
    relist: Option<HashSet<String>>,
}

impl<K> Informer<K>
where
    K: Resource + Send + Sync + 'static,
{
    /// Create an informer writing into `cache`
    pub fn new(cache: Arc<ResourceCache<K>>) -> Self {
        Self {
            cache,
            relist: None,
        }
    }

    /// The cache this informer maintains
    pub fn cache(&self) -> &Arc<ResourceCache<K>> {
        &self.cache
    }

    /// Apply one watcher event to the cache and return the resulting events
    pub fn apply(&mut self, event: watcher::Event<K>) -> Vec<ResourceEvent<K>> {
        match event {
            watcher::Event::Init => {
                debug!("Watch list started");
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                let key = object_key(&obj);
                if let (Some(seen), Some(key)) = (self.relist.as_mut(), key) {
                    seen.insert(key);
                }
                self.upsert(obj).into_iter().collect()
            }
            watcher::Event::InitDone => {
                let seen = self.relist.take().unwrap_or_default();
                let removed: Vec<ResourceEvent<K>> = self
                    .cache
                    .keys()
                    .into_iter()
                    .filter(|key| !seen.contains(key))
                    .filter_map(|key| self.cache.remove(&key))
                    .map(ResourceEvent::Deleted)
                    .collect();
                if !self.cache.is_synced() {
                    info!(objects = self.cache.len(), "Resource cache synced");
                }
                self.cache.mark_synced();
                removed
            }
            watcher::Event::Apply(obj) => self.upsert(obj).into_iter().collect(),
            watcher::Event::Delete(obj) => {
                let Some(key) = object_key(&obj) else {
                    warn!("Ignoring delete for object without a name");
                    return Vec::new();
                };
                let last_known = self.cache.remove(&key).unwrap_or_else(|| Arc::new(obj));
                vec![ResourceEvent::Deleted(last_known)]
            }
        }
    }

    fn upsert(&self, obj: K) -> Option<ResourceEvent<K>> {
        let Some(key) = object_key(&obj) else {
            warn!("Ignoring object without a name");
            return None;
        };
        let new = Arc::new(obj);
        Some(match self.cache.insert(key, new.clone()) {
            Some(old) => ResourceEvent::Updated { old, new },
            None => ResourceEvent::Added(new),
        })
    }

    /// Drive `stream` until it ends or `shutdown` fires, forwarding every event
    /// to `handler`
    pub async fn run<S>(
        mut self,
        stream: S,
        handler: Arc<dyn ResourceEventHandler<K>>,
        shutdown: CancellationToken,
    ) where
        S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send,
    {
        let mut stream = std::pin::pin!(stream);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Informer stopping");
                    return;
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        for event in self.apply(event) {
                            handler.on_event(event);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "Watch stream error, backing off"),
                    None => {
                        warn!("Watch stream ended");
                        return;
                    }
                },
            }
        }
    }
}
