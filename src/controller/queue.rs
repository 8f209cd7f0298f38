//! Deduplicating, rate-limited work queue
//!
//! A FIFO of keys backed by a membership set. A key that is already waiting
//! is not queued twice, and a key that is being processed is parked until
//! [`WorkQueue::done`] is called for it, so no key is ever handled by two
//! workers at once.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

// =============================================================================
// Rate Limiter
// =============================================================================

/// Backoff settings for failed keys
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound on the delay
    pub max_delay: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`
#[derive(Debug)]
pub struct ExponentialRateLimiter {
    config: RateLimiterConfig,
    failures: Mutex<HashMap<String, u32>>,
}

impl ExponentialRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn when(&self, key: &str) -> Duration {
        let exponent = {
            let mut failures = self.failures.lock();
            let count = failures.entry(key.to_string()).or_insert(0);
            let exponent = *count;
            *count = count.saturating_add(1);
            exponent
        };

        let max = self.config.max_delay;
        let backoff = self.config.base_delay.as_secs_f64() * 2f64.powi(exponent.min(i32::MAX as u32) as i32);
        if !backoff.is_finite() || backoff >= max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(backoff)
        }
    }

    /// Clear the failure history of `key`
    pub fn forget(&self, key: &str) {
        self.failures.lock().remove(key);
    }

    /// Failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

// =============================================================================
// Work Queue
// =============================================================================

#[derive(Debug, Default)]
struct QueueState {
    /// Keys ready to be handed out, in order
    queue: VecDeque<String>,
    /// Keys that need processing (waiting or parked behind a processing run)
    dirty: HashSet<String>,
    /// Keys currently owned by a worker
    processing: HashSet<String>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: ExponentialRateLimiter,
}

/// Shared handle to a work queue; clones refer to the same queue
#[derive(Debug, Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                limiter: ExponentialRateLimiter::new(config),
            }),
        }
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: &str) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }

        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            trace!(key, "Key is processing, deferring");
            return;
        }

        state.queue.push_back(key.to_string());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(&self, key: &str, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Add `key` after its backoff delay; returns the delay used
    pub fn add_rate_limited(&self, key: &str) -> Duration {
        let delay = self.inner.limiter.when(key);
        self.add_after(key, delay);
        delay
    }

    /// Stop tracking failures for `key`
    pub fn forget(&self, key: &str) {
        self.inner.limiter.forget(key);
    }

    /// Failures recorded for `key`
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Wait for the next key.
    ///
    /// Returns `None` once the queue has been shut down; keys still waiting
    /// at that point are abandoned. The caller owns the key until it calls
    /// [`WorkQueue::done`].
    pub async fn get(&self) -> Option<String> {
        loop {
            // Register interest before checking so a concurrent add or
            // shutdown between the check and the await is not missed.
            let notified = self.inner.notify.notified();
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

    /// Release `key`; if it was re-added while processing it is queued again
    pub fn done(&self, key: &str) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop handing out keys; blocked and future `get` calls return `None`
    pub fn shutdown(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
