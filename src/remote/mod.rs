//! # Remote Store
//!
//! The authoritative, network-backed document store. Every repository talks
//! to it through the [`RemoteStore`] trait so the backend can be swapped
//! (hosted document database in production, [`MemoryRemoteStore`] in tests).
//!
//! ## Read Sources
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          READ SOURCES                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   Source::Server ──► authoritative tier (fails when unreachable)       │
//! │                      └── result also warms the cache tier              │
//! │                                                                         │
//! │   Source::Cache  ──► the store's own local cache (never hits network)  │
//! │                                                                         │
//! │   Source::Default ─► server, falling back to cache when unreachable    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Listener Lifecycle
//!
//! ```text
//!   listen(query) ──► ListenerRegistration ──► next().await ... snapshots
//!                              │
//!                              ├── remove()   ─┐
//!                              └── drop        ─┴─► detach hook (runs once)
//! ```
//!
//! A registration owns the only handle to its detach hook, so every
//! subscription is paired with exactly one unsubscribe on every exit path,
//! including task cancellation.

mod call;
mod memory;
pub mod paths;

pub use call::{with_retry, RetryPolicy};
pub use memory::{MemoryRemoteStore, RemoteOp};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Where a read is served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Server when reachable, cache otherwise
    Default,
    /// Authoritative tier only
    Server,
    /// Local cache tier only
    Cache,
}

/// A single stored document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Full path of the document
    pub path: String,
    /// Last path segment
    pub id: String,
    /// Document body
    pub data: Value,
}

impl Document {
    /// Build a document from its full path
    pub fn new(path: impl Into<String>, data: Value) -> Self {
        let path = path.into();
        let id = paths::split(&path)
            .map(|(_, id)| id.to_string())
            .unwrap_or_else(|| path.clone());
        Self { path, id, data }
    }

    /// Deserialize the body into a typed model
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| Error::DeserializationError(format!("{}: {}", self.path, e)))
    }

    /// Read a (possibly dotted) field from the body
    pub fn field(&self, name: &str) -> Option<&Value> {
        lookup_field(&self.data, name)
    }
}

/// Equality filter on one field
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Dotted field path
    pub field: String,
    /// Required value
    pub value: Value,
}

/// A collection query. Only equality filters are supported; they are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Collection path
    pub collection: String,
    /// Equality filters
    pub filters: Vec<Filter>,
    /// Maximum number of documents returned
    pub limit: Option<usize>,
}

impl Query {
    /// Query every document in `collection`
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            limit: None,
        }
    }

    /// Add an equality filter
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Cap the result size
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document body satisfies every filter
    pub fn matches(&self, data: &Value) -> bool {
        self.filters
            .iter()
            .all(|f| lookup_field(data, &f.field) == Some(&f.value))
    }
}

/// Resolve a dotted field path (`typing.u1`) inside a JSON object
pub fn lookup_field<'a>(data: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(data, |current, key| current.as_object()?.get(key))
}

/// Snapshot delivered by a listener: the full matching result set
pub type Snapshot = Result<Vec<Document>>;

/// Handle to a live listener
///
/// Holds the snapshot receiver and the detach hook. The hook runs exactly
/// once, on [`ListenerRegistration::remove`] or on drop, whichever happens
/// first. After that no further snapshot can be observed.
pub struct ListenerRegistration {
    rx: mpsc::UnboundedReceiver<Snapshot>,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerRegistration {
    /// Pair a snapshot receiver with its detach hook
    pub fn new(
        rx: mpsc::UnboundedReceiver<Snapshot>,
        detach: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            detach: Some(Box::new(detach)),
        }
    }

    /// Wait for the next snapshot. `None` once the listener is gone.
    pub async fn next(&mut self) -> Option<Snapshot> {
        if self.detach.is_none() {
            return None;
        }
        self.rx.recv().await
    }

    /// Detach now
    pub fn remove(mut self) {
        self.detach_once();
    }

    fn detach_once(&mut self) {
        if let Some(detach) = self.detach.take() {
            self.rx.close();
            detach();
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.detach_once();
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Authoritative document store with real-time listeners
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read one document. `Ok(None)` when it does not exist.
    async fn get(&self, path: &str, source: Source) -> Result<Option<Document>>;

    /// Create or overwrite a document
    async fn set(&self, path: &str, data: Value) -> Result<()>;

    /// Merge fields into an existing document. Keys may be dotted paths
    /// (`typing.u1`) addressing nested fields. Fails with
    /// [`Error::DocumentNotFound`] if the document does not exist.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()>;

    /// Delete a document. Deleting a missing document is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Run a collection query
    async fn query(&self, query: &Query, source: Source) -> Result<Vec<Document>>;

    /// Attach a real-time listener. The registration receives an initial
    /// snapshot followed by one snapshot per change to the result set.
    async fn listen(&self, query: Query) -> Result<ListenerRegistration>;
}

/// Build a field map for [`RemoteStore::update`]
pub fn fields<I, K>(entries: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    entries.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
