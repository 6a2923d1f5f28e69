//! Event handler callbacks fired by the informer.

use tracing::{trace, warn};

use crate::model::{DynamicObject, ObjectKey};
use crate::queue::WorkQueue;

/// Receives change notifications after the local cache has been updated.
///
/// Handlers run on the informer's task and must not block.
pub trait ResourceEventHandler: Send + Sync {
    fn on_add(&self, obj: &DynamicObject);
    fn on_update(&self, old: &DynamicObject, new: &DynamicObject);
    fn on_delete(&self, obj: &DynamicObject);
}

/// Derives the key of every changed object and adds it to a work queue.
#[derive(Debug, Clone)]
pub struct QueueHandler {
    queue: WorkQueue,
}

impl QueueHandler {
    pub fn new(queue: WorkQueue) -> Self {
        Self { queue }
    }

    fn enqueue(&self, event: &'static str, obj: &DynamicObject) {
        match ObjectKey::of(obj) {
            Ok(key) => {
                trace!(event, %key, "enqueue");
                self.queue.add(key);
            }
            Err(e) => warn!(event, "cannot derive key: {e}"),
        }
    }
}

impl ResourceEventHandler for QueueHandler {
    fn on_add(&self, obj: &DynamicObject) {
        self.enqueue("add", obj);
    }

    fn on_update(&self, _old: &DynamicObject, new: &DynamicObject) {
        self.enqueue("update", new);
    }

    fn on_delete(&self, obj: &DynamicObject) {
        self.enqueue("delete", obj);
    }
}
