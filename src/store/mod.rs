//! Resource store seam
//!
//! The reconciler only ever reads Kubexpose objects through [`ResourceStore`].
//! In production that is the informer-fed [`ResourceCache`]; tests substitute
//! a mock.

mod cache;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::Kubexpose;
use crate::Error;

pub use cache::ResourceCache;

/// Interval between `has_synced` polls while waiting for the initial list
pub const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Read access to the locally mirrored Kubexpose objects
#[cfg_attr(test, automock)]
pub trait ResourceStore: Send + Sync {
    /// Look up an object by its `namespace/name` key
    ///
    /// `Ok(None)` means the object does not exist (anymore).
    fn get_by_key(&self, key: &str) -> crate::Result<Option<Arc<Kubexpose>>>;

    /// Whether the initial full list has been loaded
    fn has_synced(&self) -> bool;
}

/// Derive the work-queue key for an object: `namespace/name`, or `name` for
/// cluster-scoped objects
///
/// Returns `None` for objects without a name.
pub fn object_key<K: kube::Resource>(obj: &K) -> Option<String> {
    let meta = obj.meta();
    let name = meta.name.as_deref().filter(|n| !n.is_empty())?;
    match meta.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => Some(format!("{ns}/{name}")),
        _ => Some(name.to_string()),
    }
}

/// Split a key into its namespace (if any) and name
pub fn split_key(key: &str) -> crate::Result<(Option<&str>, &str)> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok((None, name)),
        [ns, name] if !ns.is_empty() && !name.is_empty() => Ok((Some(ns), name)),
        _ => Err(Error::malformed_key(key)),
    }
}

/// Wait until the store reports it has synced
///
/// Returns `false` if `shutdown` fires first.
pub async fn wait_for_cache_sync(store: &dyn ResourceStore, shutdown: &CancellationToken) -> bool {
    let mut ticker = tokio::time::interval(SYNC_POLL_INTERVAL);
    loop {
        if store.has_synced() {
            return true;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = ticker.tick() => debug!("Waiting for resource cache to sync"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::KubexposeSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn kubexpose(namespace: Option<&str>, name: Option<&str>) -> Kubexpose {
        Kubexpose {
            metadata: ObjectMeta {
                name: name.map(str::to_string),
                namespace: namespace.map(str::to_string),
                ..Default::default()
            },
            spec: KubexposeSpec {
                service_name: "web".to_string(),
                port: 8080,
            },
        }
    }

    #[test]
    fn object_key_uses_namespace_and_name() {
        assert_eq!(
            object_key(&kubexpose(Some("default"), Some("web"))).as_deref(),
            Some("default/web")
        );
        assert_eq!(object_key(&kubexpose(None, Some("web"))).as_deref(), Some("web"));
        assert_eq!(object_key(&kubexpose(Some("default"), None)), None);
        assert_eq!(object_key(&kubexpose(Some("default"), Some(""))), None);
    }

    #[test]
    fn split_key_accepts_namespaced_and_cluster_keys() {
        assert_eq!(split_key("default/web").unwrap(), (Some("default"), "web"));
        assert_eq!(split_key("web").unwrap(), (None, "web"));
    }

    #[test]
    fn split_key_rejects_malformed_keys() {
        for key in ["", "a/b/c", "/web", "default/", "/"] {
            assert!(
                matches!(split_key(key), Err(Error::MalformedKey { .. })),
                "{key:?} should be malformed"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_cache_sync_polls_until_synced() {
        let polls = Arc::new(AtomicU32::new(0));
        let p = polls.clone();
        let mut store = MockResourceStore::new();
        store
            .expect_has_synced()
            .returning(move || p.fetch_add(1, Ordering::SeqCst) >= 3);

        let token = CancellationToken::new();
        assert!(wait_for_cache_sync(&store, &token).await);
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_cache_sync_stops_on_shutdown() {
        let mut store = MockResourceStore::new();
        store.expect_has_synced().returning(|| false);

        let token = CancellationToken::new();
        token.cancel();
        assert!(!wait_for_cache_sync(&store, &token).await);
    }
}
