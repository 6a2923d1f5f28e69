//! Integration tests for the informer, local cache, and queue handler.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use keyq_controller::event::WatchEvent;
use keyq_controller::informer::{Informer, QueueHandler, ResourceEventHandler, Store};
use keyq_controller::model::{DynamicObject, ObjectKey, ObjectMeta};
use keyq_controller::queue::WorkQueue;
use serde_json::json;
use tokio::sync::mpsc;

#[derive(Default, Clone)]
struct Recording(Arc<Mutex<Vec<String>>>);

impl Recording {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    fn push(&self, op: &str, obj: &DynamicObject) {
        let key = ObjectKey::of(obj).unwrap();
        self.0.lock().unwrap().push(format!("{op} {key}"));
    }
}

impl ResourceEventHandler for Recording {
    fn on_add(&self, obj: &DynamicObject) {
        self.push("add", obj);
    }

    fn on_update(&self, _old: &DynamicObject, new: &DynamicObject) {
        self.push("update", new);
    }

    fn on_delete(&self, obj: &DynamicObject) {
        self.push("delete", obj);
    }
}

fn pod(namespace: &str, name: &str) -> DynamicObject {
    DynamicObject::new("Pod", ObjectMeta::named(Some(namespace), name))
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn events_update_cache_and_fire_handlers() {
    let recording = Recording::default();
    let informer = Informer::new(Store::new()).with_handler(recording.clone());
    let reader = informer.reader();
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(informer.run(rx));

    tx.send(WatchEvent::Added(pod("default", "a"))).await.unwrap();
    tx.send(WatchEvent::Modified(
        pod("default", "a").with_field("status", json!({"phase": "Running"})),
    ))
    .await
    .unwrap();
    tx.send(WatchEvent::Added(pod("default", "b"))).await.unwrap();
    tx.send(WatchEvent::Deleted(pod("default", "b"))).await.unwrap();
    drop(tx);
    task.await.unwrap().unwrap();

    assert_eq!(
        recording.take(),
        vec!["add default/a", "update default/a", "add default/b", "delete default/b"]
    );
    assert!(reader.is_ready());
    assert_eq!(reader.list_keys().unwrap(), vec![ObjectKey::from("default/a")]);
    let cached = reader.get_by_key(&ObjectKey::from("default/a")).unwrap().unwrap();
    assert_eq!(cached.data["status"]["phase"], "Running");
    assert!(reader.get_by_key(&ObjectKey::from("default/b")).unwrap().is_none());
}

#[tokio::test]
async fn sync_list_diffs_against_cache() {
    let recording = Recording::default();
    let informer = Informer::new(Store::new()).with_handler(recording.clone());
    let reader = informer.reader();
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(informer.run(rx));

    tx.send(WatchEvent::Restarted(vec![pod("default", "a"), pod("default", "b")]))
        .await
        .unwrap();
    tx.send(WatchEvent::Restarted(vec![pod("default", "b"), pod("default", "c")]))
        .await
        .unwrap();
    drop(tx);
    task.await.unwrap().unwrap();

    let mut events = recording.take();
    // Listed objects come first, in list order; removals follow.
    assert_eq!(&events[..2], ["add default/a", "add default/b"]);
    events.drain(..2);
    assert_eq!(events, vec!["update default/b", "add default/c", "delete default/a"]);
    assert_eq!(
        reader.list_keys().unwrap(),
        vec![ObjectKey::from("default/b"), ObjectKey::from("default/c")]
    );
}

#[tokio::test]
async fn namespace_scope_filters_events() {
    let recording = Recording::default();
    let informer = Informer::new(Store::new())
        .namespace("default")
        .with_handler(recording.clone());
    let reader = informer.reader();
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(informer.run(rx));

    tx.send(WatchEvent::Added(pod("default", "a"))).await.unwrap();
    tx.send(WatchEvent::Added(pod("kube-system", "coredns"))).await.unwrap();
    tx.send(WatchEvent::Restarted(vec![pod("default", "a"), pod("other", "x")]))
        .await
        .unwrap();
    drop(tx);
    task.await.unwrap().unwrap();

    assert_eq!(recording.take(), vec!["add default/a", "update default/a"]);
    assert_eq!(reader.len(), 1);
}

#[tokio::test]
async fn queue_handler_enqueues_keys_once() {
    let queue = WorkQueue::with_default_limiter("pods");
    let informer = Informer::new(Store::new()).with_handler(QueueHandler::new(queue.clone()));
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(informer.run(rx));

    tx.send(WatchEvent::Added(pod("default", "a"))).await.unwrap();
    tx.send(WatchEvent::Modified(pod("default", "a"))).await.unwrap();
    tx.send(WatchEvent::Added(pod("default", "b"))).await.unwrap();
    tx.send(WatchEvent::Deleted(pod("default", "b"))).await.unwrap();
    // Nameless objects cannot be keyed and are skipped.
    tx.send(WatchEvent::Added(DynamicObject::new("Pod", ObjectMeta::default())))
        .await
        .unwrap();
    drop(tx);
    task.await.unwrap().unwrap();

    assert_eq!(queue.len(), 2);
    assert_eq!(queue.get().await, Some(ObjectKey::from("default/a")));
    assert_eq!(queue.get().await, Some(ObjectKey::from("default/b")));
}

#[tokio::test]
async fn bookmark_and_error_events_leave_cache_alone() {
    let recording = Recording::default();
    let informer = Informer::new(Store::new()).with_handler(recording.clone());
    let reader = informer.reader();
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(informer.run(rx));

    tx.send(WatchEvent::Bookmark(json!({"metadata": {"resourceVersion": "42"}})))
        .await
        .unwrap();
    tx.send(WatchEvent::Error(json!({"code": 410, "reason": "Expired"})))
        .await
        .unwrap();
    drop(tx);
    task.await.unwrap().unwrap();

    assert!(recording.take().is_empty());
    assert!(reader.is_empty());
}

#[tokio::test(start_paused = true)]
async fn resync_reannounces_cached_objects() {
    let recording = Recording::default();
    let informer = Informer::new(Store::new())
        .resync_every(Duration::from_secs(30))
        .with_handler(recording.clone());
    let handle = informer.handle();
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(informer.run(rx));

    tx.send(WatchEvent::Added(pod("default", "a"))).await.unwrap();
    settle().await;
    assert_eq!(recording.take(), vec!["add default/a"]);

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;
    assert_eq!(recording.take(), vec!["update default/a"]);

    handle.shutdown();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_stops_informer_with_open_source() {
    let informer = Informer::new(Store::new());
    let reader = informer.reader();
    let handle = informer.handle();
    let (_tx, rx) = mpsc::channel::<WatchEvent>(1);
    let task = tokio::spawn(informer.run(rx));

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("informer did not stop")
        .unwrap()
        .unwrap();
    reader.wait_until_ready().await.unwrap();
}
