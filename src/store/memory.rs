use super::{
    encode_timestamp, is_server_timestamp, CollectionPath, Delivery, Direction, DocPath,
    Document, DocumentStore, Fields, Query, Snapshot, StoreError, Subscription,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// In-process realtime document store.
///
/// Implements the full snapshot contract (ordered redelivery, generated ids,
/// server timestamp resolution, partial updates). Stores built with
/// [`MemoryStore::with_audit`] also record subscription lifecycle and write
/// attempts so callers can check ordering guarantees. Failures and latency
/// can be injected per write kind.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    collections: HashMap<CollectionPath, Vec<Document>>,
    watchers: Vec<Watcher>,
    next_watcher: u64,
    audit: bool,
    lifecycle: Vec<SubscriptionEvent>,
    writes: Vec<WriteOp>,
    fail_appends: Option<StoreError>,
    fail_updates: Option<StoreError>,
    write_latency: Option<Duration>,
    resolve_timestamps: bool,
}

struct Watcher {
    id: u64,
    query: Query,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Opened { id: u64, collection: CollectionPath },
    Closed { id: u64, collection: CollectionPath },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Append,
    Update,
}

/// One write attempt, successful or not.
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub kind: WriteKind,
    pub path: String,
    pub fields: Fields,
    pub succeeded: bool,
    pub at: Instant,
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
                collections: HashMap::new(),
                watchers: Vec::new(),
                next_watcher: 1,
                audit: false,
                lifecycle: Vec::new(),
                writes: Vec::new(),
                fail_appends: None,
                fail_updates: None,
                write_latency: None,
                resolve_timestamps: true,
            })),
        }
    }

    /// A store that keeps the lifecycle and write logs. Both grow for the
    /// lifetime of the store.
    pub fn with_audit() -> Self {
        let store = Self::new();
        store.lock().audit = true;
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    /// Insert or replace a record directly, bypassing the write log.
    pub fn insert(&self, collection: &CollectionPath, id: impl Into<String>, fields: Fields) {
        let id = id.into();
        let mut inner = self.lock();
        let documents = inner.collections.entry(collection.clone()).or_default();
        match documents.iter().position(|doc| doc.id == id) {
            Some(position) => documents[position].fields = fields,
            None => documents.push(Document { id, fields }),
        }
        inner.notify(collection);
    }

    /// Delete a record directly, bypassing the write log.
    pub fn remove(&self, doc: &DocPath) -> bool {
        let mut inner = self.lock();
        let removed = match inner.collections.get_mut(&doc.collection) {
            Some(documents) => {
                let before = documents.len();
                documents.retain(|existing| existing.id != doc.id);
                documents.len() != before
            }
            None => false,
        };
        if removed {
            inner.notify(&doc.collection);
        }
        removed
    }

    pub fn document(&self, doc: &DocPath) -> Option<Fields> {
        self.lock()
            .collections
            .get(&doc.collection)?
            .iter()
            .find(|existing| existing.id == doc.id)
            .map(|existing| existing.fields.clone())
    }

    /// Records of a collection in insertion order.
    pub fn documents(&self, collection: &CollectionPath) -> Vec<Document> {
        self.lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.lock().watchers.len()
    }

    pub fn live_subscriptions_on(&self, collection: &CollectionPath) -> usize {
        self.lock()
            .watchers
            .iter()
            .filter(|watcher| &watcher.query.collection == collection)
            .count()
    }

    pub fn lifecycle(&self) -> Vec<SubscriptionEvent> {
        self.lock().lifecycle.clone()
    }

    pub fn writes(&self) -> Vec<WriteOp> {
        self.lock().writes.clone()
    }

    pub fn fail_appends(&self, error: Option<StoreError>) {
        self.lock().fail_appends = error;
    }

    pub fn fail_updates(&self, error: Option<StoreError>) {
        self.lock().fail_updates = error;
    }

    /// Delay applied to every write before it takes effect.
    pub fn set_write_latency(&self, latency: Option<Duration>) {
        self.lock().write_latency = latency;
    }

    /// When disabled, server timestamp sentinels are stored unresolved and
    /// read back as pending.
    pub fn set_resolve_timestamps(&self, resolve: bool) {
        self.lock().resolve_timestamps = resolve;
    }

    /// Push a subscription-level error to every watcher of `collection`.
    pub fn emit_error(&self, collection: &CollectionPath, error: StoreError) {
        let inner = self.lock();
        for watcher in inner
            .watchers
            .iter()
            .filter(|watcher| &watcher.query.collection == collection)
        {
            let _ = watcher.tx.send(Err(error.clone()));
        }
    }

    /// End every subscription on `collection` from the store side. Receivers
    /// see their stream finish.
    pub fn close_subscriptions(&self, collection: &CollectionPath) {
        let mut inner = self.lock();
        let (closed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.watchers)
            .into_iter()
            .partition(|watcher| &watcher.query.collection == collection);
        inner.watchers = kept;
        for watcher in closed {
            debug!("Store closed subscription {} on {}", watcher.id, collection);
            inner.log_lifecycle(SubscriptionEvent::Closed {
                id: watcher.id,
                collection: watcher.query.collection,
            });
        }
    }

    fn unsubscribe(inner: &Weak<Mutex<Inner>>, id: u64) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut inner = inner.lock().expect("memory store lock poisoned");
        if let Some(position) = inner.watchers.iter().position(|watcher| watcher.id == id) {
            let watcher = inner.watchers.remove(position);
            debug!("Closed subscription {} on {}", id, watcher.query.collection);
            inner.log_lifecycle(SubscriptionEvent::Closed {
                id,
                collection: watcher.query.collection,
            });
        }
    }

    async fn delay(&self) {
        let latency = self.lock().write_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Inner {
    fn snapshot(&self, query: &Query) -> Snapshot {
        let mut documents: Vec<Document> = self
            .collections
            .get(&query.collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|doc| doc.fields.contains_key(&query.order_by))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        documents.sort_by(|a, b| {
            let ordering = compare_values(&a.fields[&query.order_by], &b.fields[&query.order_by]);
            match query.direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            }
        });

        Snapshot { documents }
    }

    fn notify(&self, collection: &CollectionPath) {
        for watcher in self
            .watchers
            .iter()
            .filter(|watcher| &watcher.query.collection == collection)
        {
            let snapshot = self.snapshot(&watcher.query);
            if watcher.tx.send(Ok(snapshot)).is_err() {
                warn!("Subscription {} receiver is gone", watcher.id);
            }
        }
    }

    fn resolve(&self, mut fields: Fields) -> Fields {
        if self.resolve_timestamps {
            let now = encode_timestamp(Utc::now());
            for value in fields.values_mut() {
                if is_server_timestamp(value) {
                    *value = now.clone();
                }
            }
        }
        fields
    }

    fn log_lifecycle(&mut self, event: SubscriptionEvent) {
        if self.audit {
            self.lifecycle.push(event);
        }
    }

    fn record(&mut self, kind: WriteKind, path: String, fields: &Fields, succeeded: bool) {
        if !self.audit {
            return;
        }
        self.writes.push(WriteOp {
            kind,
            path,
            fields: fields.clone(),
            succeeded,
            at: Instant::now(),
        });
    }
}

/// Cross-type ordering: null < bool < number < string < array < object.
/// Unresolved sentinels are objects and therefore sort after every instant.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_watcher;
        inner.next_watcher += 1;

        let _ = tx.send(Ok(inner.snapshot(&query)));
        debug!("Opened subscription {} on {}", id, query.collection);
        inner.log_lifecycle(SubscriptionEvent::Opened {
            id,
            collection: query.collection.clone(),
        });
        inner.watchers.push(Watcher {
            id,
            query: query.clone(),
            tx,
        });

        let weak = Arc::downgrade(&self.inner);
        Ok(Subscription::new(query, rx, move || {
            MemoryStore::unsubscribe(&weak, id)
        }))
    }

    async fn append(
        &self,
        collection: &CollectionPath,
        fields: Fields,
    ) -> Result<String, StoreError> {
        self.delay().await;

        let mut inner = self.lock();
        if let Some(error) = inner.fail_appends.clone() {
            inner.record(WriteKind::Append, collection.to_string(), &fields, false);
            return Err(error);
        }

        let id = Uuid::new_v4().simple().to_string();
        let fields = inner.resolve(fields);
        inner.record(WriteKind::Append, collection.doc(&id).to_string(), &fields, true);
        inner
            .collections
            .entry(collection.clone())
            .or_default()
            .push(Document {
                id: id.clone(),
                fields,
            });
        inner.notify(collection);
        Ok(id)
    }

    async fn update(&self, doc: &DocPath, fields: Fields) -> Result<(), StoreError> {
        self.delay().await;

        let mut inner = self.lock();
        if let Some(error) = inner.fail_updates.clone() {
            inner.record(WriteKind::Update, doc.to_string(), &fields, false);
            return Err(error);
        }

        let fields = inner.resolve(fields);
        let merged = match inner
            .collections
            .get_mut(&doc.collection)
            .and_then(|documents| documents.iter_mut().find(|existing| existing.id == doc.id))
        {
            Some(existing) => {
                for (key, value) in fields.iter() {
                    existing.fields.insert(key.clone(), value.clone());
                }
                true
            }
            None => false,
        };
        if !merged {
            inner.record(WriteKind::Update, doc.to_string(), &fields, false);
            return Err(StoreError::NotFound(doc.to_string()));
        }
        inner.record(WriteKind::Update, doc.to_string(), &fields, true);
        inner.notify(&doc.collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{decode_timestamp, server_timestamp};
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn ids(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.documents.iter().map(|doc| doc.id.as_str()).collect()
    }

    #[tokio::test]
    async fn snapshots_follow_the_requested_order() {
        let store = MemoryStore::with_audit();
        let chats = CollectionPath::root("chats");
        store.insert(&chats, "old", fields(json!({ "lastActivity": "2024-01-01T09:00:00.000000Z" })));
        store.insert(&chats, "new", fields(json!({ "lastActivity": "2024-01-01T10:00:00.000000Z" })));
        store.insert(&chats, "unordered", fields(json!({ "userName": "no activity" })));

        let mut desc = store
            .subscribe(Query::ordered("chats", "lastActivity", Direction::Descending))
            .unwrap();
        let snapshot = desc.next().await.unwrap().unwrap();
        assert_eq!(ids(&snapshot), vec!["new", "old"]);

        let mut asc = store
            .subscribe(Query::ordered("chats", "lastActivity", Direction::Ascending))
            .unwrap();
        let snapshot = asc.next().await.unwrap().unwrap();
        assert_eq!(ids(&snapshot), vec!["old", "new"]);
    }

    #[tokio::test]
    async fn every_write_redelivers_the_full_result_set() {
        let store = MemoryStore::with_audit();
        let messages = CollectionPath::sub("chats", "c1", "messages");
        let mut subscription = store
            .subscribe(Query::ordered_sub("chats", "c1", "messages", "timestamp", Direction::Ascending))
            .unwrap();
        assert!(subscription.next().await.unwrap().unwrap().documents.is_empty());

        store
            .append(&messages, fields(json!({ "text": "one", "timestamp": server_timestamp() })))
            .await
            .unwrap();
        store
            .append(&messages, fields(json!({ "text": "two", "timestamp": server_timestamp() })))
            .await
            .unwrap();

        let _first = subscription.next().await.unwrap().unwrap();
        let second = subscription.next().await.unwrap().unwrap();
        let texts: Vec<_> = second
            .documents
            .iter()
            .map(|doc| doc.fields["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn server_timestamps_resolve_unless_held_pending() {
        let store = MemoryStore::with_audit();
        let messages = CollectionPath::sub("chats", "c1", "messages");

        let id = store
            .append(&messages, fields(json!({ "timestamp": server_timestamp() })))
            .await
            .unwrap();
        let stored = store.document(&messages.doc(&id)).unwrap();
        assert!(decode_timestamp(&stored["timestamp"]).is_some());

        store.set_resolve_timestamps(false);
        let id = store
            .append(&messages, fields(json!({ "timestamp": server_timestamp() })))
            .await
            .unwrap();
        let stored = store.document(&messages.doc(&id)).unwrap();
        assert!(is_server_timestamp(&stored["timestamp"]));
    }

    #[tokio::test]
    async fn update_merges_fields_and_requires_an_existing_record() {
        let store = MemoryStore::with_audit();
        let chats = CollectionPath::root("chats");
        store.insert(&chats, "c1", fields(json!({ "userName": "Amy", "lastMessage": "old" })));

        store
            .update(&chats.doc("c1"), fields(json!({ "lastMessage": "new" })))
            .await
            .unwrap();
        let stored = store.document(&chats.doc("c1")).unwrap();
        assert_eq!(stored["userName"], "Amy");
        assert_eq!(stored["lastMessage"], "new");

        let missing = store
            .update(&chats.doc("ghost"), fields(json!({ "lastMessage": "x" })))
            .await;
        assert_eq!(missing, Err(StoreError::NotFound("chats/ghost".into())));
    }

    #[tokio::test]
    async fn dropping_a_subscription_is_recorded() {
        let store = MemoryStore::with_audit();
        let subscription = store
            .subscribe(Query::ordered("chats", "lastActivity", Direction::Descending))
            .unwrap();
        assert_eq!(store.live_subscriptions(), 1);

        drop(subscription);
        assert_eq!(store.live_subscriptions(), 0);
        let chats = CollectionPath::root("chats");
        assert_eq!(
            store.lifecycle(),
            vec![
                SubscriptionEvent::Opened { id: 1, collection: chats.clone() },
                SubscriptionEvent::Closed { id: 1, collection: chats },
            ]
        );
    }

    #[tokio::test]
    async fn injected_failures_are_logged_as_attempts() {
        let store = MemoryStore::with_audit();
        let chats = CollectionPath::root("chats");
        store.fail_appends(Some(StoreError::Unavailable("offline".into())));

        let result = store.append(&chats, fields(json!({ "text": "hi" }))).await;
        assert!(result.is_err());
        assert!(store.documents(&chats).is_empty());

        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].kind, WriteKind::Append);
        assert!(!writes[0].succeeded);
    }

    #[test]
    fn numbers_compare_numerically() {
        assert_eq!(compare_values(&json!(9), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&server_timestamp(), &json!("2024")), Ordering::Greater);
    }

    #[tokio::test]
    async fn plain_stores_keep_no_audit_trail() {
        let store = MemoryStore::new();
        let chats = CollectionPath::root("chats");
        store.insert(&chats, "c1", fields(json!({ "userName": "Amy" })));
        let subscription = store
            .subscribe(Query::ordered("chats", "userName", Direction::Ascending))
            .unwrap();
        for _ in 0..50 {
            store
                .update(&chats.doc("c1"), fields(json!({ "adminTyping": true })))
                .await
                .unwrap();
        }
        drop(subscription);

        assert!(store.writes().is_empty());
        assert!(store.lifecycle().is_empty());
        assert_eq!(store.document(&chats.doc("c1")).unwrap()["adminTyping"], true);
    }

    #[tokio::test]
    async fn store_side_close_ends_the_stream() {
        let store = MemoryStore::with_audit();
        let chats = CollectionPath::root("chats");
        let mut subscription = store
            .subscribe(Query::ordered("chats", "lastActivity", Direction::Descending))
            .unwrap();
        assert!(subscription.next().await.unwrap().is_ok());

        store.close_subscriptions(&chats);
        assert!(subscription.next().await.is_none());
        assert_eq!(store.live_subscriptions(), 0);

        drop(subscription);
        assert_eq!(
            store.lifecycle(),
            vec![
                SubscriptionEvent::Opened { id: 1, collection: chats.clone() },
                SubscriptionEvent::Closed { id: 1, collection: chats },
            ]
        );
    }
}
