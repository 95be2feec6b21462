//! In-process reference store
//!
//! Backs tests and local sessions with the same semantics the real
//! substrate offers: last-writer-wins plain writes, per-subtree
//! check-and-set, watch fan-out, deferred disconnect writes, and
//! injectable failures for exercising retry paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::path::StorePath;
use crate::store::{DeferredWrite, Snapshot, SyncStore, TxnOp, TxnOutcome};

struct Watcher {
    path: StorePath,
    tx: mpsc::UnboundedSender<Snapshot>,
}

struct Inner {
    root: Value,
    watchers: Vec<Watcher>,
    deferred: HashMap<u64, (StorePath, Value)>,
    /// Failure injection: the next N fallible operations error out.
    fail_budget: u32,
    /// Targeted injection: the next N removes error out.
    fail_removes: u32,
}

/// Shared in-memory document tree.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    next_token: Arc<AtomicU64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                root: Value::Object(Map::new()),
                watchers: Vec::new(),
                deferred: HashMap::new(),
                fail_budget: 0,
                fail_removes: 0,
            })),
            next_token: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Make the next `count` fallible operations fail with
    /// `Error::Unavailable`, as a network blip would.
    pub fn inject_failures(&self, count: u32) {
        self.inner.lock().unwrap().fail_budget = count;
    }

    /// Make only the next `count` removes fail, leaving reads and
    /// writes healthy. Exercises removal-verification paths.
    pub fn inject_remove_failures(&self, count: u32) {
        self.inner.lock().unwrap().fail_removes = count;
    }

    /// Number of deferred writes currently registered.
    pub fn pending_deferred(&self) -> usize {
        self.inner.lock().unwrap().deferred.len()
    }

    /// Sever the connection: every registered deferred write fires, the
    /// way the substrate would apply them server-side.
    pub fn simulate_severance(&self) {
        let fired: Vec<(StorePath, Value)> = {
            let mut inner = self.inner.lock().unwrap();
            inner.deferred.drain().map(|(_, pv)| pv).collect()
        };
        for (path, value) in fired {
            debug!(path = %path, "deferred write fired on severance");
            let mut inner = self.inner.lock().unwrap();
            set_at(&mut inner.root, &path, value);
            notify(&mut inner, &path);
        }
    }

    fn check_failure(inner: &mut Inner) -> Result<()> {
        if inner.fail_budget > 0 {
            inner.fail_budget -= 1;
            return Err(Error::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

impl SyncStore for MemoryStore {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failure(&mut inner)?;
        Ok(get_at(&inner.root, path).cloned())
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failure(&mut inner)?;
        // A null write clears the path, matching the substrate
        if value.is_null() {
            remove_at(&mut inner.root, path);
        } else {
            set_at(&mut inner.root, path, value);
        }
        notify(&mut inner, path);
        Ok(())
    }

    async fn remove(&self, path: &StorePath) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failure(&mut inner)?;
        if inner.fail_removes > 0 {
            inner.fail_removes -= 1;
            return Err(Error::Unavailable("injected remove failure".to_string()));
        }
        remove_at(&mut inner.root, path);
        notify(&mut inner, path);
        Ok(())
    }

    async fn watch(&self, path: &StorePath) -> Result<mpsc::UnboundedReceiver<Snapshot>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        let current = snapshot_at(&inner.root, path);
        let _ = tx.send(current);
        inner.watchers.push(Watcher {
            path: path.clone(),
            tx,
        });
        Ok(rx)
    }

    async fn transact<F>(&self, path: &StorePath, mut updater: F) -> Result<TxnOutcome>
    where
        F: FnMut(Option<&Value>) -> TxnOp + Send,
    {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failure(&mut inner)?;
        // The lock spans read, decide, and commit, so the check-and-set
        // precondition holds by construction here
        let current = get_at(&inner.root, path).cloned();
        match updater(current.as_ref()) {
            TxnOp::Update(value) => {
                set_at(&mut inner.root, path, value.clone());
                notify(&mut inner, path);
                Ok(TxnOutcome {
                    committed: true,
                    value: Some(value),
                })
            }
            TxnOp::Remove => {
                remove_at(&mut inner.root, path);
                notify(&mut inner, path);
                Ok(TxnOutcome {
                    committed: true,
                    value: None,
                })
            }
            TxnOp::Abort => Ok(TxnOutcome {
                committed: false,
                value: current,
            }),
        }
    }

    async fn on_disconnect_write(&self, path: &StorePath, value: Value) -> Result<DeferredWrite> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();
        Self::check_failure(&mut inner)?;
        inner.deferred.insert(token, (path.clone(), value));
        Ok(DeferredWrite(token))
    }

    async fn cancel_deferred(&self, token: DeferredWrite) -> Result<()> {
        // Stale cancellations are no-ops
        self.inner.lock().unwrap().deferred.remove(&token.0);
        Ok(())
    }
}

fn snapshot_at(root: &Value, path: &StorePath) -> Snapshot {
    let value = get_at(root, path).cloned();
    Snapshot {
        exists: value.is_some(),
        value,
    }
}

/// Push the snapshot at each overlapping watcher's path; prune watchers
/// whose receiver is gone.
fn notify(inner: &mut Inner, changed: &StorePath) {
    let root = inner.root.clone();
    inner.watchers.retain(|watcher| {
        if !watcher.path.overlaps(changed) {
            return !watcher.tx.is_closed();
        }
        watcher.tx.send(snapshot_at(&root, &watcher.path)).is_ok()
    });
}

fn get_at<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.segments() {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

fn set_at(root: &mut Value, path: &StorePath, value: Value) {
    let segments = path.segments();
    if segments.is_empty() {
        *root = value;
        return;
    }
    let mut node = root;
    for segment in &segments[..segments.len() - 1] {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()
            .unwrap()
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    node.as_object_mut()
        .unwrap()
        .insert(segments[segments.len() - 1].clone(), value);
}

/// Remove the subtree at `path`, pruning parents left empty.
fn remove_at(root: &mut Value, path: &StorePath) {
    fn walk(node: &mut Value, segments: &[String]) -> bool {
        let Some(map) = node.as_object_mut() else {
            return false;
        };
        match segments {
            [] => false,
            [last] => {
                map.remove(last);
                map.is_empty()
            }
            [head, rest @ ..] => {
                let prune_child = match map.get_mut(head) {
                    Some(child) => walk(child, rest),
                    None => false,
                };
                if prune_child {
                    map.remove(head);
                }
                map.is_empty()
            }
        }
    }
    if path.segments().is_empty() {
        *root = Value::Object(Map::new());
    } else {
        walk(root, path.segments());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> StorePath {
        StorePath::parse(s)
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let store = MemoryStore::new();
        store.write(&path("rooms/A/story"), json!("login flow")).await.unwrap();
        let value = store.read(&path("rooms/A/story")).await.unwrap();
        assert_eq!(value, Some(json!("login flow")));
        // Parent materialized as an object
        let room = store.read(&path("rooms/A")).await.unwrap().unwrap();
        assert_eq!(room["story"], json!("login flow"));
    }

    #[tokio::test]
    async fn test_read_absent() {
        let store = MemoryStore::new();
        assert_eq!(store.read(&path("rooms/NOPE")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_prunes_empty_parents() {
        let store = MemoryStore::new();
        store.write(&path("rooms/A/participants/p1/vote"), json!("5")).await.unwrap();
        store.remove(&path("rooms/A/participants/p1")).await.unwrap();
        assert_eq!(store.read(&path("rooms/A")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_null_write_clears() {
        let store = MemoryStore::new();
        store.write(&path("rooms/A/story"), json!("x")).await.unwrap();
        store.write(&path("rooms/A/story"), Value::Null).await.unwrap();
        assert_eq!(store.read(&path("rooms/A/story")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_watch_fires_initial_and_on_change() {
        let store = MemoryStore::new();
        let mut rx = store.watch(&path("rooms/A")).await.unwrap();

        let initial = rx.recv().await.unwrap();
        assert!(!initial.exists);

        store.write(&path("rooms/A/story"), json!("x")).await.unwrap();
        let snap = rx.recv().await.unwrap();
        assert!(snap.exists);
        assert_eq!(snap.value.unwrap()["story"], json!("x"));
    }

    #[tokio::test]
    async fn test_watch_sees_ancestor_removal() {
        let store = MemoryStore::new();
        store.write(&path("rooms/A/story"), json!("x")).await.unwrap();
        let mut rx = store.watch(&path("rooms/A/story")).await.unwrap();
        let _ = rx.recv().await.unwrap();

        store.remove(&path("rooms/A")).await.unwrap();
        let snap = rx.recv().await.unwrap();
        assert!(!snap.exists);
    }

    #[tokio::test]
    async fn test_transact_update_and_abort() {
        let store = MemoryStore::new();
        let outcome = store
            .transact(&path("rooms/A/owner"), |current| {
                if current.is_none() {
                    TxnOp::Update(json!("me"))
                } else {
                    TxnOp::Abort
                }
            })
            .await
            .unwrap();
        assert!(outcome.committed);

        // Second claimant observes the winner and becomes a no-op
        let outcome = store
            .transact(&path("rooms/A/owner"), |current| {
                if current.is_none() {
                    TxnOp::Update(json!("other"))
                } else {
                    TxnOp::Abort
                }
            })
            .await
            .unwrap();
        assert!(!outcome.committed);
        assert_eq!(outcome.value, Some(json!("me")));
    }

    #[tokio::test]
    async fn test_transact_remove() {
        let store = MemoryStore::new();
        store.write(&path("rooms/A/story"), json!("x")).await.unwrap();
        let outcome = store
            .transact(&path("rooms/A"), |_| TxnOp::Remove)
            .await
            .unwrap();
        assert!(outcome.committed);
        assert_eq!(store.read(&path("rooms/A")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_deferred_write_fires_on_severance() {
        let store = MemoryStore::new();
        store
            .on_disconnect_write(&path("rooms/A/p/disconnected_at"), json!("t0"))
            .await
            .unwrap();
        assert_eq!(store.pending_deferred(), 1);

        store.simulate_severance();
        assert_eq!(store.pending_deferred(), 0);
        assert_eq!(
            store.read(&path("rooms/A/p/disconnected_at")).await.unwrap(),
            Some(json!("t0"))
        );
    }

    #[tokio::test]
    async fn test_deferred_write_cancel() {
        let store = MemoryStore::new();
        let token = store
            .on_disconnect_write(&path("rooms/A/p/disconnected_at"), json!("t0"))
            .await
            .unwrap();
        store.cancel_deferred(token).await.unwrap();
        store.simulate_severance();
        assert_eq!(store.read(&path("rooms/A/p/disconnected_at")).await.unwrap(), None);

        // Cancelling again is a tolerated no-op
        store.cancel_deferred(token).await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.inject_failures(2);
        assert!(store.read(&path("x")).await.is_err());
        assert!(store.write(&path("x"), json!(1)).await.is_err());
        assert!(store.write(&path("x"), json!(1)).await.is_ok());
    }
}
