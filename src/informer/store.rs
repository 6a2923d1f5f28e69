//! Local cache of observed objects.
//!
//! [`Store`] is the single writer and belongs to the informer. Everyone else
//! gets a [`StoreReader`], which can look objects up but never change them.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::model::{DynamicObject, ObjectKey};

type Objects = HashMap<ObjectKey, Arc<DynamicObject>>;

#[derive(Debug)]
struct StoreInner {
    objects: RwLock<Objects>,
}

/// Write half of the local cache.
#[derive(Debug)]
pub struct Store {
    inner: Arc<StoreInner>,
    ready: watch::Sender<bool>,
}

/// Read-only view of the local cache.
#[derive(Debug, Clone)]
pub struct StoreReader {
    inner: Arc<StoreInner>,
    ready: watch::Receiver<bool>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(StoreInner {
                objects: RwLock::new(HashMap::new()),
            }),
            ready,
        }
    }

    pub fn reader(&self) -> StoreReader {
        StoreReader {
            inner: Arc::clone(&self.inner),
            ready: self.ready.subscribe(),
        }
    }

    /// Insert or replace an object, returning the previous version.
    pub fn upsert(&mut self, obj: DynamicObject) -> Result<Option<Arc<DynamicObject>>> {
        let key = ObjectKey::of(&obj)?;
        let mut objects = self.inner.objects.write().map_err(|_| Error::CachePoisoned)?;
        Ok(objects.insert(key, Arc::new(obj)))
    }

    /// Remove an object, returning what was cached for it.
    pub fn remove(&mut self, key: &ObjectKey) -> Result<Option<Arc<DynamicObject>>> {
        let mut objects = self.inner.objects.write().map_err(|_| Error::CachePoisoned)?;
        Ok(objects.remove(key))
    }

    /// Replace the whole cache with `objs`, returning the previous contents.
    /// Objects without a name are skipped.
    pub fn replace(&mut self, objs: Vec<DynamicObject>) -> Result<Objects> {
        let mut fresh = HashMap::with_capacity(objs.len());
        for obj in objs {
            match ObjectKey::of(&obj) {
                Ok(key) => {
                    fresh.insert(key, Arc::new(obj));
                }
                Err(e) => tracing::warn!("skipping listed object: {e}"),
            }
        }
        let mut objects = self.inner.objects.write().map_err(|_| Error::CachePoisoned)?;
        Ok(std::mem::replace(&mut *objects, fresh))
    }

    /// Snapshot of every cached object.
    pub fn snapshot(&self) -> Result<Vec<Arc<DynamicObject>>> {
        let objects = self.inner.objects.read().map_err(|_| Error::CachePoisoned)?;
        Ok(objects.values().cloned().collect())
    }

    /// Flag the cache as holding a complete view of the watched collection.
    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }
}

impl StoreReader {
    /// Look up the current version of an object.
    ///
    /// `Ok(None)` means the object is not (or no longer) cached.
    pub fn get_by_key(&self, key: &ObjectKey) -> Result<Option<Arc<DynamicObject>>> {
        let objects = self.inner.objects.read().map_err(|_| Error::CachePoisoned)?;
        Ok(objects.get(key).cloned())
    }

    pub fn list_keys(&self) -> Result<Vec<ObjectKey>> {
        let objects = self.inner.objects.read().map_err(|_| Error::CachePoisoned)?;
        let mut keys: Vec<_> = objects.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn len(&self) -> usize {
        self.inner
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the informer has marked the cache ready.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let mut ready = self.ready.clone();
        ready
            .wait_for(|r| *r)
            .await
            .map(|_| ())
            .map_err(|_| Error::Other("store writer dropped before the cache synced".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectMeta;

    fn pod(name: &str) -> DynamicObject {
        DynamicObject::new("Pod", ObjectMeta::named(Some("default"), name))
    }

    #[test]
    fn reader_sees_writer_changes() {
        let mut store = Store::new();
        let reader = store.reader();
        let key = ObjectKey::from("default/a");

        assert!(reader.get_by_key(&key).unwrap().is_none());

        assert!(store.upsert(pod("a")).unwrap().is_none());
        assert_eq!(reader.get_by_key(&key).unwrap().unwrap().kind, "Pod");

        let previous = store.upsert(pod("a")).unwrap();
        assert!(previous.is_some());
        assert_eq!(reader.len(), 1);

        store.remove(&key).unwrap();
        assert!(reader.get_by_key(&key).unwrap().is_none());
    }

    #[test]
    fn replace_swaps_contents() {
        let mut store = Store::new();
        let reader = store.reader();
        store.upsert(pod("old")).unwrap();

        let previous = store.replace(vec![pod("a"), pod("b")]).unwrap();
        assert_eq!(previous.len(), 1);
        assert_eq!(
            reader.list_keys().unwrap(),
            vec![ObjectKey::from("default/a"), ObjectKey::from("default/b")]
        );
    }

    #[test]
    fn upsert_rejects_nameless_object() {
        let mut store = Store::new();
        let nameless = DynamicObject::new("Pod", ObjectMeta::default());
        assert!(matches!(store.upsert(nameless), Err(Error::MissingName)));
    }

    #[test]
    fn len_survives_poisoned_lock() {
        let mut store = Store::new();
        let reader = store.reader();
        store.upsert(pod("a")).unwrap();

        let inner = Arc::clone(&store.inner);
        let poisoner = std::thread::spawn(move || {
            let _guard = inner.objects.write().unwrap();
            panic!("writer died mid-update");
        });
        assert!(poisoner.join().is_err());

        assert_eq!(reader.len(), 1);
        assert!(!reader.is_empty());
        assert!(matches!(reader.list_keys(), Err(Error::CachePoisoned)));
    }

    #[tokio::test]
    async fn wait_until_ready_resolves_after_mark() {
        let store = Store::new();
        let reader = store.reader();
        assert!(!reader.is_ready());

        let waiter = tokio::spawn(async move { reader.wait_until_ready().await });
        store.mark_ready();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn wait_until_ready_fails_if_writer_dropped() {
        let store = Store::new();
        let reader = store.reader();
        drop(store);
        assert!(reader.wait_until_ready().await.is_err());
    }
}
