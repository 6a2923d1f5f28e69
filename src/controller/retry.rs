//! Retry policy with bounded exponential backoff.
//!
//! Success clears a key's failure history. A failure requeues the key through
//! the queue's rate limiter until it has been requeued `max_retries` times;
//! the next failure drops it.

use opentelemetry::KeyValue;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::model::ObjectKey;
use crate::queue::WorkQueue;
use crate::telemetry::metrics;

/// Default retry ceiling.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

/// What the policy did with a processed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Processing succeeded; history cleared.
    Forgotten,
    /// Processing failed; key requeued. `attempt` is the requeue count before
    /// this failure.
    Requeued { attempt: u32 },
    /// Processing failed and the ceiling was reached; key dropped.
    Dropped { attempts: u32 },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Feed the outcome of processing `key` back into `queue`.
    pub fn handle(
        &self,
        queue: &WorkQueue,
        key: &ObjectKey,
        result: Result<(), &Error>,
    ) -> RetryDecision {
        let err = match result {
            Ok(()) => {
                queue.forget(key);
                return RetryDecision::Forgotten;
            }
            Err(err) => err,
        };

        let requeues = queue.num_requeues(key);
        if requeues < self.max_retries {
            warn!(%key, retry = requeues, "reconcile failed, retrying: {err}");
            queue.add_rate_limited(key.clone());
            return RetryDecision::Requeued { attempt: requeues };
        }

        queue.forget(key);
        metrics::queue_drops().add(1, &[KeyValue::new("queue", queue.name().to_string())]);
        error!(
            %key,
            attempts = requeues + 1,
            "dropping key out of the queue: {err}"
        );
        debug!(%key, "retry history cleared");
        RetryDecision::Dropped {
            attempts: requeues + 1,
        }
    }
}
