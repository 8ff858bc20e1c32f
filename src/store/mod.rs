//! Document-store contract consumed by the hub.
//!
//! The realtime store itself is an external collaborator. The hub only ever
//! opens ordered snapshot subscriptions, appends records and applies partial
//! updates; everything else about persistence lives behind [`DocumentStore`].

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod memory;

pub use memory::MemoryStore;

/// Raw field map of a stored record.
pub type Fields = Map<String, Value>;

/// Key of the write-time sentinel object produced by [`server_timestamp`].
pub const SERVER_TIMESTAMP_KEY: &str = "$serverTimestamp";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("subscription closed")]
    Closed,
}

/// Path of a collection, either top-level or nested under a parent record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionPath {
    Root(String),
    Sub {
        parent: String,
        parent_id: String,
        name: String,
    },
}

impl CollectionPath {
    pub fn root(name: impl Into<String>) -> Self {
        Self::Root(name.into())
    }

    pub fn sub(
        parent: impl Into<String>,
        parent_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::Sub {
            parent: parent.into(),
            parent_id: parent_id.into(),
            name: name.into(),
        }
    }

    pub fn doc(&self, id: impl Into<String>) -> DocPath {
        DocPath {
            collection: self.clone(),
            id: id.into(),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionPath::Root(name) => write!(f, "{}", name),
            CollectionPath::Sub {
                parent,
                parent_id,
                name,
            } => write!(f, "{}/{}/{}", parent, parent_id, name),
        }
    }
}

/// Path of a single record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath {
    pub collection: CollectionPath,
    pub id: String,
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// An ordered query over one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: CollectionPath,
    pub order_by: String,
    pub direction: Direction,
}

impl Query {
    /// Ordered query over a top-level collection.
    pub fn ordered(
        collection: impl Into<String>,
        order_by: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            collection: CollectionPath::root(collection),
            order_by: order_by.into(),
            direction,
        }
    }

    /// Ordered query over a sub-collection scoped under `parent_id`.
    pub fn ordered_sub(
        parent: impl Into<String>,
        parent_id: impl Into<String>,
        sub_collection: impl Into<String>,
        order_by: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            collection: CollectionPath::sub(parent, parent_id, sub_collection),
            order_by: order_by.into(),
            direction,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

/// The complete, ordered result set of a query at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub documents: Vec<Document>,
}

pub type Delivery = Result<Snapshot, StoreError>;

/// A live channel bound to one query.
///
/// Every change redelivers the full result set. Dropping the handle tears the
/// channel down; there is no other way to release it.
pub struct Subscription {
    query: Query,
    rx: mpsc::UnboundedReceiver<Delivery>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        query: Query,
        rx: mpsc::UnboundedReceiver<Delivery>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            query,
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Next delivery, or `None` once the store has closed the channel.
    /// Cancel-safe.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a snapshot subscription. The current result set is delivered
    /// first, then again after every change.
    fn subscribe(&self, query: Query) -> Result<Subscription, StoreError>;

    /// Append a record with a store-generated id.
    async fn append(&self, collection: &CollectionPath, fields: Fields)
        -> Result<String, StoreError>;

    /// Merge `fields` into an existing record.
    async fn update(&self, doc: &DocPath, fields: Fields) -> Result<(), StoreError>;
}

/// Write-time sentinel the store replaces with its own clock.
pub fn server_timestamp() -> Value {
    let mut sentinel = Map::new();
    sentinel.insert(SERVER_TIMESTAMP_KEY.to_string(), Value::Bool(true));
    Value::Object(sentinel)
}

pub fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|object| object.contains_key(SERVER_TIMESTAMP_KEY))
}

/// Wire form of a resolved instant. Fixed precision keeps lexical and
/// chronological order identical.
pub fn encode_timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

pub fn decode_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
