//! Worker pool draining the work queue

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::reconciler::{process_item, record_outcome, Context, ItemOutcome};
use crate::metrics;
use crate::store::wait_for_cache_sync;
use crate::Error;

/// Take one key from the queue and process it
///
/// Returns `false` once the queue is shut down. A panic while processing is
/// contained to the key: it is reported and forgotten, and the worker keeps
/// running.
pub async fn process_next_item(ctx: &Context) -> bool {
    let Some(key) = ctx.queue.get().await else {
        return false;
    };

    process_contained(ctx, &key).await;
    ctx.queue.done(&key);
    metrics::QUEUE_DEPTH.record(ctx.queue.len() as u64, &[]);
    true
}

/// Run [`process_item`], turning a panic into a reported, dropped key
async fn process_contained(ctx: &Context, key: &String) -> ItemOutcome {
    let start = Instant::now();
    match AssertUnwindSafe(process_item(ctx, key)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let err = Error::internal_with_context("worker", panic_message(panic.as_ref()));
            ctx.queue.forget(key);
            ctx.reporter.report(key, &err);
            record_outcome(ItemOutcome::Dropped, start);
            ItemOutcome::Dropped
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("reconcile panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("reconcile panicked: {s}")
    } else {
        "reconcile panicked".to_string()
    }
}

/// Run `workers` concurrent workers until `shutdown` fires
///
/// Processing starts only after the store has completed its initial list.
/// On shutdown the queue stops handing out keys; in-flight items finish
/// before this returns.
pub async fn run_workers(ctx: Arc<Context>, workers: usize, shutdown: CancellationToken) {
    if !wait_for_cache_sync(ctx.store.as_ref(), &shutdown).await {
        error!("Shutdown before the resource cache synced; not starting workers");
        ctx.queue.shut_down();
        return;
    }

    info!(workers, "Resource cache synced, starting workers");
    let mut set = JoinSet::new();
    for id in 0..workers {
        let ctx = ctx.clone();
        set.spawn(async move {
            while process_next_item(&ctx).await {}
            info!(worker = id, "Worker stopped");
        });
    }

    shutdown.cancelled().await;
    info!("Shutting down work queue");
    ctx.queue.shut_down();

    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            error!(error = %e, "Worker task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockErrorReporter;
    use crate::crd::{Kubexpose, KubexposeSpec};
    use crate::dependent::{CreateOutcome, MockDependentClient};
    use crate::queue::{BackoffConfig, WorkQueue};
    use crate::store::{MockResourceStore, ResourceStore};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn sample_kubexpose() -> Arc<Kubexpose> {
        Arc::new(Kubexpose {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("3c1d9e52-0000-4000-8000-000000000002".to_string()),
                ..Default::default()
            },
            spec: KubexposeSpec {
                service_name: "web".to_string(),
                port: 8080,
            },
        })
    }

    fn synced_store() -> MockResourceStore {
        let mut store = MockResourceStore::new();
        store
            .expect_get_by_key()
            .returning(|_| Ok(Some(sample_kubexpose())));
        store.expect_has_synced().returning(|| true);
        store
    }

    fn fast_queue() -> WorkQueue<String> {
        WorkQueue::new(BackoffConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        })
    }

    /// Story: the API server rejects every create. The key is attempted
    /// exactly five times, reported once, and never handed out again.
    #[tokio::test(start_paused = true)]
    async fn persistent_failure_is_attempted_five_times_then_reported() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let mut client = MockDependentClient::new();
        client.expect_get_dependent().returning(|_, _| Ok(None));
        client.expect_create_dependent().returning(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
            Err(Error::internal("apiserver unavailable"))
        });
        let mut reporter = MockErrorReporter::new();
        reporter
            .expect_report()
            .withf(|key, _| key == "default/web")
            .times(1)
            .return_const(());

        let ctx = Context::builder(Arc::new(synced_store()), Arc::new(client), fast_queue())
            .reporter(Arc::new(reporter))
            .build();
        ctx.queue.add("default/web".to_string());

        for _ in 0..5 {
            assert!(process_next_item(&ctx).await);
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        assert_eq!(ctx.queue.num_requeues(&"default/web".to_string()), 0);

        let sixth = tokio::time::timeout(Duration::from_secs(3600), ctx.queue.get()).await;
        assert!(sixth.is_err(), "key handed out after giving up");
    }

    struct PanickingStore;

    impl ResourceStore for PanickingStore {
        fn get_by_key(&self, _key: &str) -> Result<Option<Arc<Kubexpose>>, Error> {
            panic!("store exploded")
        }

        fn has_synced(&self) -> bool {
            true
        }
    }

    /// Counts reconciles of the same key that overlap in time
    #[derive(Default)]
    struct OverlapStore {
        in_flight: AtomicU32,
        overlaps: AtomicU32,
    }

    impl ResourceStore for OverlapStore {
        fn get_by_key(&self, _key: &str) -> Result<Option<Arc<Kubexpose>>, Error> {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(2));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        }

        fn has_synced(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn panicking_reconcile_is_contained() {
        let mut reporter = MockErrorReporter::new();
        reporter
            .expect_report()
            .withf(|key, err| key == "default/web" && matches!(err, Error::Internal { .. }))
            .times(1)
            .return_const(());

        let ctx = Context::builder(
            Arc::new(PanickingStore),
            Arc::new(MockDependentClient::new()),
            fast_queue(),
        )
        .reporter(Arc::new(reporter))
        .build();
        ctx.queue.add("default/web".to_string());

        assert!(process_next_item(&ctx).await);

        // The key was released, so a new event can be processed
        ctx.queue.add("default/web".to_string());
        assert_eq!(ctx.queue.len(), 1);
    }

    /// Story: a panicking reconcile is counted as a dropped item, like any
    /// other terminal failure
    #[tokio::test]
    async fn panicking_reconcile_counts_as_dropped() {
        let mut reporter = MockErrorReporter::new();
        reporter.expect_report().times(1).return_const(());
        let ctx = Context::builder(
            Arc::new(PanickingStore),
            Arc::new(MockDependentClient::new()),
            fast_queue(),
        )
        .reporter(Arc::new(reporter))
        .build();
        let key = "default/web".to_string();

        assert_eq!(process_contained(&ctx, &key).await, ItemOutcome::Dropped);
        assert_eq!(ctx.queue.num_requeues(&key), 0);
    }

    #[tokio::test]
    async fn process_next_item_returns_false_after_shutdown() {
        let ctx = Context::builder(
            Arc::new(synced_store()),
            Arc::new(MockDependentClient::new()),
            fast_queue(),
        )
        .build();
        ctx.queue.shut_down();
        assert!(!process_next_item(&ctx).await);
    }

    /// Story: a burst of notifications for one key across several workers
    /// never runs two reconciles of that key at the same time
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_never_process_a_key_concurrently() {
        let store = Arc::new(OverlapStore::default());
        let ctx = Arc::new(
            Context::builder(
                store.clone(),
                Arc::new(MockDependentClient::new()),
                fast_queue(),
            )
            .build(),
        );
        let shutdown = CancellationToken::new();
        let runner = tokio::spawn(run_workers(ctx.clone(), 4, shutdown.clone()));

        for _ in 0..50 {
            ctx.queue.add("default/web".to_string());
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        runner.await.unwrap();

        assert_eq!(store.overlaps.load(Ordering::SeqCst), 0);
        assert!(ctx.queue.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn run_workers_waits_for_sync() {
        let synced = Arc::new(AtomicU32::new(0));
        let s = synced.clone();
        let mut store = MockResourceStore::new();
        store
            .expect_has_synced()
            .returning(move || s.load(Ordering::SeqCst) > 0);
        store.expect_get_by_key().returning(|_| Ok(None));

        let mut client = MockDependentClient::new();
        client
            .expect_create_dependent()
            .returning(|_| Ok(CreateOutcome::Created));

        let ctx = Arc::new(
            Context::builder(Arc::new(store), Arc::new(client), fast_queue()).build(),
        );
        ctx.queue.add("default/web".to_string());

        let shutdown = CancellationToken::new();
        let runner = tokio::spawn(run_workers(ctx.clone(), 1, shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ctx.queue.len(), 1, "processed before the cache synced");

        synced.store(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(ctx.queue.is_empty());

        shutdown.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn run_workers_returns_when_shutdown_precedes_sync() {
        let mut store = MockResourceStore::new();
        store.expect_has_synced().returning(|| false);
        let ctx = Arc::new(
            Context::builder(
                Arc::new(store),
                Arc::new(MockDependentClient::new()),
                fast_queue(),
            )
            .build(),
        );
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        run_workers(ctx.clone(), 2, shutdown).await;
        assert!(ctx.queue.is_shutting_down());
    }
}
