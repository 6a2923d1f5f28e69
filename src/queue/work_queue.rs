//! Deduplicating, rate-limited FIFO of object keys.
//!
//! The pending set, the in-flight set, the FIFO order and the per-key failure
//! counts all live in one [`QueueState`] behind one mutex. The mutex is never
//! held across an await point.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::{Notify, watch};
use tracing::{debug, trace};

use super::rate_limiter::{RateLimiter, default_controller_rate_limiter};
use crate::model::ObjectKey;
use crate::telemetry::metrics;

#[derive(Debug, Default)]
struct QueueState {
    /// Delivery order of pending keys.
    queue: VecDeque<ObjectKey>,
    /// Keys that need processing. A superset of `queue`: a key re-added while
    /// in flight sits here until `done` moves it back into `queue`.
    dirty: HashSet<ObjectKey>,
    /// Keys currently held by a worker.
    processing: HashSet<ObjectKey>,
    /// Consecutive failures per key.
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Shared {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    closed: watch::Sender<bool>,
    limiter: Box<dyn RateLimiter>,
}

/// Handle to a work queue. Cheap to clone; all clones share one queue.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl WorkQueue {
    /// Create a named queue using the given rate limiter for retries.
    pub fn new(name: impl Into<String>, limiter: impl RateLimiter + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                closed: watch::channel(false).0,
                limiter: Box::new(limiter),
            }),
        }
    }

    /// Create a queue with the default controller rate limiter.
    pub fn with_default_limiter(name: impl Into<String>) -> Self {
        Self::new(name, default_controller_rate_limiter())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Nothing in the critical sections can panic half-way through an
        // update, so a poisoned state is still consistent.
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn labels(&self) -> [KeyValue; 1] {
        [KeyValue::new("queue", self.shared.name.clone())]
    }

    /// Mark `key` as needing processing.
    ///
    /// No-op if the key is already pending, or if the queue is shutting down.
    /// A key that is currently in flight is remembered and delivered again
    /// once its worker calls [`done`](Self::done).
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.lock();
        if state.shutting_down {
            debug!(queue = %self.shared.name, %key, "queue shutting down, discarding add");
            return;
        }
        if state.dirty.contains(&key) {
            trace!(queue = %self.shared.name, %key, "key already pending");
            return;
        }
        state.dirty.insert(key.clone());
        let deferred = state.processing.contains(&key);
        if !deferred {
            state.queue.push_back(key.clone());
        }
        drop(state);

        metrics::queue_adds().add(1, &self.labels());
        if deferred {
            trace!(queue = %self.shared.name, %key, "key in flight, deferring");
            return;
        }
        metrics::queue_depth().add(1, &self.labels());
        self.shared.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed.
    ///
    /// Must be called from within a tokio runtime when `delay` is non-zero.
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Add `key` after the delay the rate limiter assigns to its current
    /// failure count, then bump that count.
    pub fn add_rate_limited(&self, key: ObjectKey) {
        let delay = {
            let mut state = self.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.shared.limiter.when(*failures);
            *failures += 1;
            delay
        };
        debug!(
            queue = %self.shared.name,
            %key,
            delay_ms = delay.as_millis() as u64,
            "requeue with backoff"
        );
        metrics::queue_retries().add(1, &self.labels());
        self.add_after(key, delay);
    }

    /// Clear the failure history of `key`. Queue membership is unaffected.
    pub fn forget(&self, key: &ObjectKey) {
        self.lock().failures.remove(key);
    }

    /// Number of times `key` has been requeued through
    /// [`add_rate_limited`](Self::add_rate_limited) since it was last forgotten.
    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key and mark it in flight.
    ///
    /// Returns `None` once the queue is shut down and no pending key is left.
    /// The caller must call [`done`](Self::done) with the returned key.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register interest before looking at the state so a concurrent
            // `add` or `shut_down` cannot slip between the check and the wait.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    metrics::queue_depth().add(-1, &self.labels());
                    if more {
                        // Pass the wakeup on; another worker may be parked.
                        self.shared.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release the in-flight marker on `key`. If the key was re-added while
    /// in flight it becomes pending again.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            metrics::queue_depth().add(1, &self.labels());
            self.shared.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting [`get`](Self::get).
    ///
    /// Keys already pending are still handed out; once they are gone `get`
    /// returns `None`. Irreversible.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        debug!(queue = %self.shared.name, "queue shut down");
        self.shared.notify.notify_waiters();
        self.shared.closed.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Resolve once [`shut_down`](Self::shut_down) has been called.
    pub async fn shut_down_requested(&self) {
        let mut closed = self.shared.closed.subscribe();
        // The sender lives in `shared`, which `self` keeps alive.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Number of keys waiting for a worker.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently held by workers.
    pub fn in_flight(&self) -> usize {
        self.lock().processing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::rate_limiter::ExponentialBackoff;

    fn key(s: &str) -> ObjectKey {
        ObjectKey::from(s)
    }

    #[tokio::test]
    async fn duplicate_adds_collapse() {
        let q = WorkQueue::with_default_limiter("test");
        q.add(key("default/a"));
        q.add(key("default/a"));
        assert_eq!(q.len(), 1);

        assert_eq!(q.get().await, Some(key("default/a")));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn fifo_across_distinct_keys() {
        let q = WorkQueue::with_default_limiter("test");
        for k in ["a", "b", "c"] {
            q.add(key(k));
        }
        assert_eq!(q.get().await, Some(key("a")));
        assert_eq!(q.get().await, Some(key("b")));
        assert_eq!(q.get().await, Some(key("c")));
    }

    #[tokio::test]
    async fn readd_while_in_flight_waits_for_done() {
        let q = WorkQueue::with_default_limiter("test");
        q.add(key("a"));
        let got = q.get().await.unwrap();
        assert_eq!(q.in_flight(), 1);

        q.add(key("a"));
        q.add(key("a"));
        assert_eq!(q.len(), 0, "in-flight key must not get a second slot");

        q.done(&got);
        assert_eq!(q.in_flight(), 0);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some(key("a")));
    }

    #[tokio::test]
    async fn done_without_readd_clears_key() {
        let q = WorkQueue::with_default_limiter("test");
        q.add(key("a"));
        let got = q.get().await.unwrap();
        q.done(&got);
        assert!(q.is_empty());
        assert_eq!(q.in_flight(), 0);
    }

    #[tokio::test]
    async fn failure_counts_track_rate_limited_adds() {
        let q = WorkQueue::new(
            "test",
            ExponentialBackoff::new(Duration::ZERO, Duration::ZERO),
        );
        let k = key("a");
        assert_eq!(q.num_requeues(&k), 0);
        q.add_rate_limited(k.clone());
        q.add_rate_limited(k.clone());
        assert_eq!(q.num_requeues(&k), 2);

        // Zero delay goes straight into the queue, deduplicated.
        assert_eq!(q.len(), 1);

        q.forget(&k);
        assert_eq!(q.num_requeues(&k), 0);
        assert_eq!(q.len(), 1, "forget does not touch queue membership");
    }

    #[tokio::test]
    async fn shutdown_drains_then_reports_none() {
        let q = WorkQueue::with_default_limiter("test");
        q.add(key("a"));
        q.shut_down();
        q.add(key("b"));

        assert_eq!(q.get().await, Some(key("a")));
        assert_eq!(q.get().await, None);
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn shut_down_requested_resolves_after_shut_down() {
        let q = WorkQueue::with_default_limiter("test");
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.shut_down_requested().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        q.shut_down();
        waiter.await.unwrap();
        // Already shut down: resolves immediately.
        q.shut_down_requested().await;
    }

    #[tokio::test]
    async fn shutdown_wakes_blocked_getters() {
        let q = WorkQueue::with_default_limiter("test");
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let q = q.clone();
                tokio::spawn(async move { q.get().await })
            })
            .collect();

        tokio::task::yield_now().await;
        q.shut_down();

        for w in waiters {
            assert_eq!(w.await.unwrap(), None);
        }
    }
}
