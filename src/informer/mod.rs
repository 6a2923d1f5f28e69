//! Informer: keeps the local cache in sync with a watch source and fans
//! change notifications out to registered handlers.

pub mod handler;
pub mod store;

pub use handler::{QueueHandler, ResourceEventHandler};
pub use store::{Store, StoreReader};

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, Interval};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::event::WatchEvent;
use crate::model::{DynamicObject, ObjectKey};
use crate::telemetry::metrics;

/// Handle used to stop a running informer.
#[derive(Debug, Clone)]
pub struct InformerHandle {
    shutdown: Arc<Notify>,
}

impl InformerHandle {
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

pub struct Informer {
    store: Store,
    handlers: Vec<Arc<dyn ResourceEventHandler>>,
    namespace: Option<String>,
    resync_period: Option<Duration>,
    shutdown: Arc<Notify>,
}

impl Informer {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            handlers: Vec::new(),
            namespace: None,
            resync_period: None,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Only track objects in this namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Re-announce every cached object as an update this often.
    pub fn resync_every(mut self, period: Duration) -> Self {
        self.resync_period = Some(period);
        self
    }

    pub fn with_handler(mut self, handler: impl ResourceEventHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn reader(&self) -> StoreReader {
        self.store.reader()
    }

    pub fn handle(&self) -> InformerHandle {
        InformerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Apply watch events until the channel closes or shutdown is requested.
    ///
    /// The cache is marked ready after the first `SYNC` event, or after the
    /// first event of any kind when the source never lists.
    pub async fn run(mut self, mut events: mpsc::Receiver<WatchEvent>) -> Result<()> {
        let mut resync = self
            .resync_period
            .map(|p| tokio::time::interval_at(Instant::now() + p, p));
        let shutdown = Arc::clone(&self.shutdown);

        info!(namespace = ?self.namespace, "informer started");

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("informer shutting down");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("watch source closed");
                        break;
                    };
                    if let Err(e) = self.apply(event) {
                        warn!("failed to apply watch event: {e}");
                    }
                    if !self.store.is_ready() {
                        self.store.mark_ready();
                    }
                }
                _ = next_tick(&mut resync) => {
                    self.resync();
                }
            }
        }

        // A source that closes without ever sending leaves nothing to wait for.
        self.store.mark_ready();
        Ok(())
    }

    fn in_scope(&self, obj: &DynamicObject) -> bool {
        match &self.namespace {
            Some(ns) => obj.metadata.namespace.as_deref() == Some(ns.as_str()),
            None => true,
        }
    }

    fn apply(&mut self, event: WatchEvent) -> Result<()> {
        metrics::watch_events().add(1, &[KeyValue::new("event", event.label())]);

        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                if !self.in_scope(&obj) {
                    return Ok(());
                }
                let new = obj.clone();
                match self.store.upsert(obj)? {
                    Some(old) => self.handlers.iter().for_each(|h| h.on_update(&old, &new)),
                    None => self.handlers.iter().for_each(|h| h.on_add(&new)),
                }
            }
            WatchEvent::Deleted(obj) => {
                if !self.in_scope(&obj) {
                    return Ok(());
                }
                let key = ObjectKey::of(&obj)?;
                // Prefer the cached copy; the event may carry a stale one.
                let last = self.store.remove(&key)?;
                let last = last.as_deref().unwrap_or(&obj);
                self.handlers.iter().for_each(|h| h.on_delete(last));
            }
            WatchEvent::Restarted(objs) => {
                let objs: Vec<_> = objs.into_iter().filter(|o| self.in_scope(o)).collect();
                let listed = objs.clone();
                let mut previous = self.store.replace(objs)?;
                debug!(count = listed.len(), "cache replaced from list");

                for new in &listed {
                    let Ok(key) = ObjectKey::of(new) else {
                        continue;
                    };
                    match previous.remove(&key) {
                        Some(old) => self.handlers.iter().for_each(|h| h.on_update(&old, new)),
                        None => self.handlers.iter().for_each(|h| h.on_add(new)),
                    }
                }
                for gone in previous.values() {
                    self.handlers.iter().for_each(|h| h.on_delete(gone));
                }
                self.store.mark_ready();
            }
            WatchEvent::Bookmark(_) => {}
            WatchEvent::Error(status) => {
                warn!(%status, "watch source reported an error");
            }
        }
        Ok(())
    }

    fn resync(&self) {
        let objects = match self.store.snapshot() {
            Ok(objects) => objects,
            Err(e) => {
                warn!("resync skipped: {e}");
                return;
            }
        };
        debug!(count = objects.len(), "resync");
        for obj in &objects {
            self.handlers.iter().for_each(|h| h.on_update(obj, obj));
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
