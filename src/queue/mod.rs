//! Deduplicating, rate-limited work queue
//!
//! Guarantees:
//! - a key is queued at most once while it waits (`dirty` set)
//! - a key is handed to at most one worker at a time (`processing` set); an
//!   `add` for a key that is being processed is parked until `done`
//! - once shut down, `get` hands out nothing and returns `None`
//!
//! Delayed adds run on spawned tokio timers that are cancelled on shutdown.

mod rate_limiter;

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub use rate_limiter::{BackoffConfig, ItemBackoff};

#[derive(Debug)]
struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    backoff: ItemBackoff<K>,
    shutdown: CancellationToken,
}

/// Work queue shared between the event translator and the workers
///
/// Cloning is cheap; all clones share the same queue.
#[derive(Debug)]
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Create a queue with the given requeue backoff
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                backoff: ItemBackoff::new(backoff),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Mark `key` as needing processing
    ///
    /// No-op if the key is already waiting or the queue is shut down. A key that
    /// is currently being processed is requeued when its worker calls `done`.
    pub fn add(&self, key: K) {
        {
            let mut state = self.inner.state.lock();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        self.inner.notify.notify_one();
    }

    /// Add `key` after `delay` has elapsed
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        if self.is_shutting_down() {
            return;
        }

        let queue = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Requeue `key` after its next backoff delay
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.inner.backoff.when(&key);
        self.add_after(key, delay);
    }

    /// Number of rate-limited requeues of `key` since it was last forgotten
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner.backoff.num_requeues(key)
    }

    /// Reset the backoff for `key`
    pub fn forget(&self, key: &K) {
        self.inner.backoff.forget(key);
    }

    /// Wait for the next key
    ///
    /// Returns `None` once the queue is shut down. The caller owns the key until
    /// it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            // Register interest before inspecting state so a concurrent add or
            // shut_down between the check and the await is not missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Finish processing `key`
    ///
    /// If the key was added again while it was being processed it becomes
    /// visible to `get` now.
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.inner.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    /// Whether `shut_down` has been called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Whether no keys are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
