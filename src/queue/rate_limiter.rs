//! Per-key exponential backoff for rate-limited requeues
//!
//! Each key tracks its own consecutive failure count. The n-th requeue of a key
//! waits `initial_delay * backoff_multiplier^n`, capped at `max_delay`.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;

/// Configuration for per-key requeue backoff
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first requeue
    pub initial_delay: Duration,
    /// Maximum delay between requeues
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            backoff_multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay for a key that has already been requeued `requeues` times
    pub fn delay_for(&self, requeues: u32) -> Duration {
        let exp = i32::try_from(requeues).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        // powi overflows to +inf for large exponents; min() clamps that too.
        // Rounding near u64::MAX seconds can still fail the conversion.
        Duration::try_from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
            .unwrap_or(self.max_delay)
    }
}

/// Tracks requeue counts per key and hands out the next backoff delay
#[derive(Debug)]
pub struct ItemBackoff<K> {
    config: BackoffConfig,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> ItemBackoff<K> {
    /// Create a tracker with the given configuration
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a requeue of `key` and return how long to wait before it
    pub fn when(&self, key: &K) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.clone()).or_insert(0);
        let delay = self.config.delay_for(*count);
        *count = count.saturating_add(1);
        delay
    }

    /// Number of requeues recorded for `key`
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }

    /// Stop tracking `key`, resetting its backoff
    pub fn forget(&self, key: &K) {
        self.failures.lock().remove(key);
    }
}
