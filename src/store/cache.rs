//! In-memory mirror of watched objects, keyed by `namespace/name`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::ResourceStore;
use crate::crd::Kubexpose;

/// Concurrent object cache filled by the informer
///
/// Readers never block the watch task for longer than a shard lock.
pub struct ResourceCache<K> {
    objects: DashMap<String, Arc<K>>,
    synced: AtomicBool,
}

impl<K> Default for ResourceCache<K> {
    fn default() -> Self {
        Self {
            objects: DashMap::new(),
            synced: AtomicBool::new(false),
        }
    }
}

impl<K> ResourceCache<K> {
    /// Create an empty, unsynced cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an object by key
    pub fn get(&self, key: &str) -> Option<Arc<K>> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    /// Insert or replace an object, returning the previous version
    pub fn insert(&self, key: String, obj: Arc<K>) -> Option<Arc<K>> {
        self.objects.insert(key, obj)
    }

    /// Remove an object, returning the last known version
    pub fn remove(&self, key: &str) -> Option<Arc<K>> {
        self.objects.remove(key).map(|(_, obj)| obj)
    }

    /// Snapshot of all cached keys
    pub fn keys(&self) -> Vec<String> {
        self.objects.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the cache holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Record that the initial list has been loaded
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    /// Whether the initial list has been loaded
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

impl ResourceStore for ResourceCache<Kubexpose> {
    fn get_by_key(&self, key: &str) -> crate::Result<Option<Arc<Kubexpose>>> {
        Ok(self.get(key))
    }

    fn has_synced(&self) -> bool {
        self.is_synced()
    }
}
