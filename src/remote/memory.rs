//! # In-Memory Remote Store
//!
//! A process-local [`RemoteStore`] with the same observable behavior as the
//! hosted backend: a server tier, a cache tier warmed by server reads,
//! real-time listeners and dotted-field updates. It can be taken offline
//! and can be told to fail or hang on specific operations, which makes
//! every synchronization property checkable without a network.
//!
//! ```text
//!            ┌──────────── MemoryRemoteStore ────────────┐
//!            │                                           │
//!  get/query │  Server ──(warms)──► Cache                │
//!  ─────────►│    ▲                   ▲                  │
//!            │    └──── set/update/delete write both ────┤
//!            │                                           │
//!            │  listeners: Vec<Slot>  (query, sender)    │
//!            │  failures:  Vec<(op, error, remaining)>   │
//!            └───────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Notify};

use super::{paths, Document, ListenerRegistration, Query, RemoteStore, Snapshot, Source};
use crate::error::{Error, Result};

/// Operation kinds, used for failure injection and call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Get,
    Set,
    Update,
    Delete,
    Query,
    Listen,
}

struct ListenerSlot {
    id: u64,
    query: Query,
    tx: mpsc::UnboundedSender<Snapshot>,
}

struct InjectedFailure {
    op: RemoteOp,
    error: Error,
    remaining: u32,
}

#[derive(Default)]
struct Inner {
    server: BTreeMap<String, Value>,
    cache: BTreeMap<String, Value>,
    offline: bool,
    listeners: Vec<ListenerSlot>,
    next_listener_id: u64,
    attached: usize,
    detached: usize,
    failures: Vec<InjectedFailure>,
    stalled: HashSet<RemoteOp>,
    calls: BTreeMap<&'static str, usize>,
}

impl Inner {
    fn record_call(&mut self, op: RemoteOp) {
        *self.calls.entry(op_name(op)).or_default() += 1;
    }

    /// Consume one injected failure for `op`, if any is pending
    fn take_failure(&mut self, op: RemoteOp) -> Option<Error> {
        let index = self.failures.iter().position(|f| f.op == op)?;
        let failure = &mut self.failures[index];
        let error = failure.error.clone();
        failure.remaining = failure.remaining.saturating_sub(1);
        if failure.remaining == 0 {
            self.failures.remove(index);
        }
        Some(error)
    }

    /// Common prologue of every server-touching operation
    fn begin(&mut self, op: RemoteOp, path: &str) -> Result<()> {
        self.record_call(op);
        if let Some(err) = self.take_failure(op) {
            return Err(err);
        }
        if self.offline {
            return Err(Error::RemoteUnavailable(format!("offline: {}", path)));
        }
        Ok(())
    }

    fn run_query(tier: &BTreeMap<String, Value>, query: &Query) -> Vec<Document> {
        let docs = tier
            .iter()
            .filter(|(path, _)| {
                paths::split(path).map(|(collection, _)| collection) == Some(query.collection.as_str())
            })
            .filter(|(_, data)| query.matches(data))
            .map(|(path, data)| Document::new(path.clone(), data.clone()));

        match query.limit {
            Some(limit) => docs.take(limit).collect(),
            None => docs.collect(),
        }
    }

    /// Push a fresh snapshot to every listener watching `path`'s collection
    fn notify(&mut self, path: &str) {
        let Some((collection, _)) = paths::split(path) else {
            return;
        };
        for slot in self.listeners.iter().filter(|s| s.query.collection == collection) {
            let snapshot = Self::run_query(&self.server, &slot.query);
            // A closed receiver is cleaned up by its detach hook.
            let _ = slot.tx.send(Ok(snapshot));
        }
    }

    fn write(&mut self, path: &str, data: Value) {
        self.server.insert(path.to_string(), data.clone());
        self.cache.insert(path.to_string(), data);
        self.notify(path);
    }
}

fn op_name(op: RemoteOp) -> &'static str {
    match op {
        RemoteOp::Get => "get",
        RemoteOp::Set => "set",
        RemoteOp::Update => "update",
        RemoteOp::Delete => "delete",
        RemoteOp::Query => "query",
        RemoteOp::Listen => "listen",
    }
}

/// Write `value` at a dotted field path, creating intermediate objects
fn set_dotted(target: &mut Map<String, Value>, dotted: &str, value: Value) {
    match dotted.split_once('.') {
        None => {
            target.insert(dotted.to_string(), value);
        }
        Some((head, rest)) => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                set_dotted(child, rest, value);
            }
        }
    }
}

/// In-process remote store
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<Inner>>,
    resumed: Arc<Notify>,
}

impl MemoryRemoteStore {
    /// Create an empty, online store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) connectivity. Cache reads keep working.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Make the next `times` calls of `op` fail with `error`
    pub fn inject_failure(&self, op: RemoteOp, error: Error, times: u32) {
        if times == 0 {
            return;
        }
        self.inner.lock().failures.push(InjectedFailure {
            op,
            error,
            remaining: times,
        });
    }

    /// Deliver `error` to every listener on `collection`
    pub fn fail_listeners(&self, collection: &str, error: Error) {
        let inner = self.inner.lock();
        for slot in inner.listeners.iter().filter(|s| s.query.collection == collection) {
            let _ = slot.tx.send(Err(error.clone()));
        }
    }

    /// Store a document on the server tier only, leaving the cache cold
    pub fn seed_server_only(&self, path: &str, data: Value) {
        let mut inner = self.inner.lock();
        inner.server.insert(path.to_string(), data);
        inner.notify(path);
    }

    /// Server-tier body at `path`, bypassing accounting and failures
    pub fn server_document(&self, path: &str) -> Option<Value> {
        self.inner.lock().server.get(path).cloned()
    }

    /// Server-tier documents of a collection
    pub fn server_collection(&self, collection: &str) -> Vec<Document> {
        let inner = self.inner.lock();
        Inner::run_query(&inner.server, &Query::collection(collection))
    }

    /// Make calls of `op` hang without completing, like a backend that
    /// accepted the connection and never answered, until [`resume`](Self::resume)
    pub fn stall(&self, op: RemoteOp) {
        self.inner.lock().stalled.insert(op);
    }

    /// Let calls of `op` through again, including the ones already hanging
    pub fn resume(&self, op: RemoteOp) {
        self.inner.lock().stalled.remove(&op);
        self.resumed.notify_waiters();
    }

    async fn hang_if_stalled(&self, op: RemoteOp) {
        loop {
            let resumed = self.resumed.notified();
            let stalled = self.inner.lock().stalled.contains(&op);
            if !stalled {
                return;
            }
            resumed.await;
        }
    }

    /// Listeners currently attached
    pub fn active_listeners(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Listeners attached since creation
    pub fn attach_count(&self) -> usize {
        self.inner.lock().attached
    }

    /// Detach hooks run since creation
    pub fn detach_count(&self) -> usize {
        self.inner.lock().detached
    }

    /// Calls of `op` made so far
    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.inner.lock().calls.get(op_name(op)).copied().unwrap_or(0)
    }

    /// Calls of every kind made so far
    pub fn total_calls(&self) -> usize {
        self.inner.lock().calls.values().sum()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, path: &str, source: Source) -> Result<Option<Document>> {
        self.hang_if_stalled(RemoteOp::Get).await;
        let mut inner = self.inner.lock();

        if source == Source::Cache {
            inner.record_call(RemoteOp::Get);
            if let Some(err) = inner.take_failure(RemoteOp::Get) {
                return Err(err);
            }
            return Ok(inner.cache.get(path).map(|d| Document::new(path, d.clone())));
        }

        match inner.begin(RemoteOp::Get, path) {
            Ok(()) => {}
            Err(Error::RemoteUnavailable(_)) if source == Source::Default => {
                return Ok(inner.cache.get(path).map(|d| Document::new(path, d.clone())));
            }
            Err(err) => return Err(err),
        }

        match inner.server.get(path).cloned() {
            Some(data) => {
                inner.cache.insert(path.to_string(), data.clone());
                Ok(Some(Document::new(path, data)))
            }
            None => {
                inner.cache.remove(path);
                Ok(None)
            }
        }
    }

    async fn set(&self, path: &str, data: Value) -> Result<()> {
        self.hang_if_stalled(RemoteOp::Set).await;
        let mut inner = self.inner.lock();
        inner.begin(RemoteOp::Set, path)?;
        inner.write(path, data);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        self.hang_if_stalled(RemoteOp::Update).await;
        let mut inner = self.inner.lock();
        inner.begin(RemoteOp::Update, path)?;

        let mut data = inner
            .server
            .get(path)
            .cloned()
            .ok_or_else(|| Error::DocumentNotFound(path.to_string()))?;

        let Value::Object(body) = &mut data else {
            return Err(Error::RemoteError(format!("{} is not an object", path)));
        };
        for (key, value) in fields {
            set_dotted(body, &key, value);
        }

        inner.write(path, data);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.hang_if_stalled(RemoteOp::Delete).await;
        let mut inner = self.inner.lock();
        inner.begin(RemoteOp::Delete, path)?;
        inner.server.remove(path);
        inner.cache.remove(path);
        inner.notify(path);
        Ok(())
    }

    async fn query(&self, query: &Query, source: Source) -> Result<Vec<Document>> {
        self.hang_if_stalled(RemoteOp::Query).await;
        let mut inner = self.inner.lock();

        if source == Source::Cache {
            inner.record_call(RemoteOp::Query);
            if let Some(err) = inner.take_failure(RemoteOp::Query) {
                return Err(err);
            }
            return Ok(Inner::run_query(&inner.cache, query));
        }

        match inner.begin(RemoteOp::Query, &query.collection) {
            Ok(()) => {}
            Err(Error::RemoteUnavailable(_)) if source == Source::Default => {
                return Ok(Inner::run_query(&inner.cache, query));
            }
            Err(err) => return Err(err),
        }

        let docs = Inner::run_query(&inner.server, query);
        for doc in &docs {
            inner.cache.insert(doc.path.clone(), doc.data.clone());
        }
        Ok(docs)
    }

    async fn listen(&self, query: Query) -> Result<ListenerRegistration> {
        self.hang_if_stalled(RemoteOp::Listen).await;
        let mut inner = self.inner.lock();
        inner.begin(RemoteOp::Listen, &query.collection)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(Inner::run_query(&inner.server, &query)));

        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.attached += 1;
        tracing::trace!(listener = id, collection = %query.collection, "Listener attached");
        inner.listeners.push(ListenerSlot { id, query, tx });

        let shared = Arc::downgrade(&self.inner);
        Ok(ListenerRegistration::new(rx, move || {
            if let Some(shared) = shared.upgrade() {
                let mut inner = shared.lock();
                inner.listeners.retain(|slot| slot.id != id);
                inner.detached += 1;
                tracing::trace!(listener = id, "Listener detached");
            }
        }))
    }
}
