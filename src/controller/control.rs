//! Worker loop: pull a key, reconcile the cached object, report the outcome.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, error, info};

use super::reconciler::Reconciler;
use super::retry::{RetryDecision, RetryPolicy};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::informer::StoreReader;
use crate::model::ObjectKey;
use crate::queue::WorkQueue;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_outcome, start_reconcile_span};

/// How processing one key ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The reconciler ran and succeeded.
    Reconciled,
    /// The key is no longer in the cache; nothing to do.
    Missing,
}

/// Handle used to stop a running controller from elsewhere.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    queue: WorkQueue,
}

impl ControllerHandle {
    pub fn stop(&self) {
        self.queue.shut_down();
    }
}

/// Releases the in-flight marker on every exit path, unwinding included.
struct InFlight<'a> {
    queue: &'a WorkQueue,
    key: ObjectKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

/// Drains a work queue with a pool of identical worker loops.
pub struct Controller<R: Reconciler> {
    queue: WorkQueue,
    reader: StoreReader,
    reconciler: Arc<R>,
    retry: RetryPolicy,
    workers: usize,
}

impl<R: Reconciler> Clone for Controller<R> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            reader: self.reader.clone(),
            reconciler: Arc::clone(&self.reconciler),
            retry: self.retry,
            workers: self.workers,
        }
    }
}

impl<R: Reconciler> Controller<R> {
    pub fn new(
        queue: WorkQueue,
        reader: StoreReader,
        reconciler: R,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            queue,
            reader,
            reconciler: Arc::new(reconciler),
            retry: config.retry_policy(),
            workers: config.workers.max(1),
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            queue: self.queue.clone(),
        }
    }

    /// Shut the queue down. Workers finish their current key and exit.
    pub fn stop(&self) {
        self.queue.shut_down();
    }

    /// Wait for the cache to sync, start the workers, and block until every
    /// worker has observed shutdown.
    ///
    /// Returns early if the queue is shut down before the cache syncs.
    pub async fn run(&self) -> Result<()> {
        tokio::select! {
            ready = self.reader.wait_until_ready() => ready?,
            () = self.queue.shut_down_requested() => {
                info!(kind = R::KIND, "stopped before the cache synced");
                return Ok(());
            }
        }
        info!(
            kind = R::KIND,
            workers = self.workers,
            cached = self.reader.len(),
            "cache synced, starting workers"
        );

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let this = self.clone();
            workers.spawn(async move { this.worker_loop(id).await });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("worker task ended abnormally: {e}");
            }
        }

        info!(kind = R::KIND, "controller stopped");
        Ok(())
    }

    async fn worker_loop(&self, id: usize) {
        debug!(worker = id, "worker started");
        while self.process_next_item().await {}
        debug!(worker = id, "worker exiting");
    }

    /// Take one key off the queue and process it.
    ///
    /// Returns `false` once the queue has shut down.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        let in_flight = InFlight {
            queue: &self.queue,
            key,
        };
        let key = &in_flight.key;

        let span = start_reconcile_span(R::KIND, key, self.queue.num_requeues(key));
        let started = Instant::now();
        let result = self.sync(key).instrument(span.clone()).await;

        let label = match &result {
            Ok(SyncOutcome::Reconciled) => "ok",
            Ok(SyncOutcome::Missing) => "missing",
            Err(_) => "error",
        };
        metrics::reconcile_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("kind", R::KIND), KeyValue::new("result", label)],
        );

        let decision = span.in_scope(|| {
            self.retry
                .handle(&self.queue, key, result.as_ref().map(|_| ()))
        });
        record_outcome(
            &span,
            match decision {
                RetryDecision::Forgotten => label,
                RetryDecision::Requeued { .. } => "requeued",
                RetryDecision::Dropped { .. } => "dropped",
            },
        );
        true
    }

    /// Reconcile the current cached state of `key`.
    ///
    /// A key that is no longer cached was deleted; that is a successful no-op.
    pub async fn sync(&self, key: &ObjectKey) -> Result<SyncOutcome> {
        let Some(obj) = self.reader.get_by_key(key)? else {
            info!(%key, "object no longer exists");
            return Ok(SyncOutcome::Missing);
        };
        let typed: R::Object = obj.try_parse(R::KIND)?;

        let reconciler = Arc::clone(&self.reconciler);
        let owned_key = key.clone();
        // A panicking reconciler takes down its own task, not the worker.
        let task = tokio::spawn(
            async move { reconciler.reconcile(&owned_key, typed).await }
                .instrument(Span::current()),
        );

        match task.await {
            Ok(result) => result.map(|()| SyncOutcome::Reconciled),
            Err(e) if e.is_panic() => Err(Error::ReconcilePanic(panic_message(e.into_panic()))),
            Err(e) => Err(Error::Other(format!("reconcile task cancelled: {e}"))),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
