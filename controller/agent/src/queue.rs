//! Rate-limited work queue with single-flight per-key discipline.
//!
//! Keys are deduplicated while queued and while in flight: a key added
//! during its own processing is marked dirty and re-queued when processing
//! completes, so no two workers ever hold the same key concurrently. Failed
//! keys are re-queued with exponential backoff up to a bounded retry count,
//! then dropped.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use std::{collections::VecDeque, hash::Hash, sync::Arc};
use tokio::{sync::Notify, time::Duration};

/// Retry bound after which a failing key is dropped.
pub const DEFAULT_RETRY_LIMIT: u32 = 15;

/// Base delay for the exponential backoff; doubles per attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Ceiling on a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

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

struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
    retry_limit: u32,
}

struct State<K> {
    queue: VecDeque<K>,
    /// Keys waiting in the queue, or re-added while in flight.
    dirty: HashSet<K>,
    /// Keys currently held by a worker.
    processing: HashSet<K>,
    /// Failure count per key since its last success.
    retries: HashMap<K, u32>,
    shutdown: bool,
}

// === impl WorkQueue ===

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_rate_limit(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_RETRY_LIMIT)
    }

    pub fn with_rate_limit(base_delay: Duration, max_delay: Duration, retry_limit: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    retries: HashMap::new(),
                    shutdown: false,
                }),
                notify: Notify::new(),
                base_delay,
                max_delay,
                retry_limit,
            }),
        }
    }

    /// Enqueues a key. A key already queued is deduplicated; a key in flight
    /// is marked dirty and re-queued once its current pass completes.
    pub fn add(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.shutdown || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// The next key to process. Blocks until a key is available; `None` once
    /// the queue has shut down.
    pub async fn next(&self) -> Option<K> {
        loop {
            {
                let mut state = self.inner.state.lock();
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Marks a key's processing pass finished. If the key went dirty while in
    /// flight it is re-queued, reflecting the latest observed state.
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutdown {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Clears a key's failure count after a successful pass.
    pub fn forget(&self, key: &K) {
        self.inner.state.lock().retries.remove(key);
    }

    /// Re-queues a failed key after an exponentially growing delay. Returns
    /// `false` once the retry bound is exhausted; the key is dropped and the
    /// caller surfaces the failure.
    pub fn retry(&self, key: K) -> bool {
        let attempt = {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                return false;
            }
            let attempt = state.retries.entry(key.clone()).or_insert(0);
            *attempt += 1;
            *attempt
        };

        if attempt > self.inner.retry_limit {
            self.inner.state.lock().retries.remove(&key);
            return false;
        }

        let delay = self.backoff(attempt);
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
        true
    }

    /// Stops the queue: waiting workers drain out with `None` and further
    /// adds are dropped. In-flight keys finish on their own.
    pub fn shutdown(&self) {
        self.inner.state.lock().shutdown = true;
        self.inner.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().queue.is_empty()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.inner
            .base_delay
            .saturating_mul(factor)
            .min(self.inner.max_delay)
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
