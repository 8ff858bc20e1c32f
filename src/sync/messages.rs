use super::SyncEvent;
use crate::chat::{fields, Message};
use crate::store::{Direction, DocumentStore, Query, Subscription};
use std::future;
use std::sync::Arc;
use tracing::{debug, error, warn};

struct ActiveStream {
    conversation_id: String,
    /// `None` once the store has ended or refused the stream. The selection
    /// stays put and nothing reopens it until the selection changes.
    subscription: Option<Subscription>,
}

/// Streams the messages of the selected conversation, oldest first.
///
/// Holds at most one subscription. Switching conversations closes the old
/// subscription and clears the published list before the new one opens, so
/// the list never holds records from two conversations. A stream the store
/// closes is not reopened for the same selection.
pub struct MessageStreamSynchronizer {
    store: Arc<dyn DocumentStore>,
    collection: String,
    sub_collection: String,
    active: Option<ActiveStream>,
    messages: Vec<Message>,
}

impl MessageStreamSynchronizer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        sub_collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            sub_collection: sub_collection.into(),
            active: None,
            messages: Vec::new(),
        }
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.active
            .as_ref()
            .map(|active| active.conversation_id.as_str())
    }

    /// Whether the selected conversation still has a live subscription.
    pub fn is_streaming(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.subscription.is_some())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Point the stream at `conversation_id`, or at nothing.
    ///
    /// Returns `false` when the selection was already current and nothing
    /// was torn down.
    pub fn select(&mut self, conversation_id: Option<&str>) -> bool {
        if self.selected_id() == conversation_id {
            return false;
        }

        if let Some(previous) = self.active.take() {
            debug!("Closing message stream for {}", previous.conversation_id);
            if let Some(subscription) = previous.subscription {
                subscription.close();
            }
        }
        self.messages.clear();

        let Some(conversation_id) = conversation_id else {
            return true;
        };

        let query = Query::ordered_sub(
            self.collection.as_str(),
            conversation_id,
            self.sub_collection.as_str(),
            fields::TIMESTAMP,
            Direction::Ascending,
        );
        let subscription = match self.store.subscribe(query) {
            Ok(subscription) => {
                debug!("Opened message stream for {}", conversation_id);
                Some(subscription)
            }
            Err(e) => {
                error!("Failed to open message stream for {}: {}", conversation_id, e);
                None
            }
        };
        self.active = Some(ActiveStream {
            conversation_id: conversation_id.to_string(),
            subscription,
        });
        true
    }

    /// Wait for the next delivery on the active stream and apply it. Pends
    /// forever while nothing is streaming. Cancel-safe.
    pub async fn next_event(&mut self) -> SyncEvent {
        let Some(active) = self.active.as_mut() else {
            return future::pending().await;
        };
        let Some(subscription) = active.subscription.as_mut() else {
            return future::pending().await;
        };

        match subscription.next().await {
            Some(Ok(snapshot)) => {
                debug!(
                    "Message snapshot for {}: {} messages",
                    active.conversation_id,
                    snapshot.documents.len()
                );
                self.messages = snapshot
                    .documents
                    .iter()
                    .map(Message::from_document)
                    .collect();
                SyncEvent::Replaced
            }
            Some(Err(e)) => {
                error!("Message subscription error for {}: {}", active.conversation_id, e);
                SyncEvent::Failed
            }
            None => {
                warn!("Message stream for {} closed by the store", active.conversation_id);
                active.subscription = None;
                SyncEvent::Closed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Timestamp;
    use crate::entity::Role;
    use crate::store::memory::SubscriptionEvent;
    use crate::store::{server_timestamp, CollectionPath, DocumentStore, MemoryStore, StoreError};
    use crate::sync::test_support::fields;
    use serde_json::json;

    fn messages_of(id: &str) -> CollectionPath {
        CollectionPath::sub("chats", id, "messages")
    }

    async fn post(store: &MemoryStore, conversation: &str, text: &str) {
        store
            .append(
                &messages_of(conversation),
                fields(json!({
                    "text": text,
                    "sender": "user",
                    "senderName": "Customer",
                    "timestamp": server_timestamp(),
                })),
            )
            .await
            .unwrap();
    }

    fn texts(sync: &MessageStreamSynchronizer) -> Vec<&str> {
        sync.messages().iter().map(|m| m.text.as_str()).collect()
    }

    fn sync_over(store: &MemoryStore) -> MessageStreamSynchronizer {
        MessageStreamSynchronizer::new(Arc::new(store.clone()), "chats", "messages")
    }

    #[tokio::test]
    async fn switching_closes_the_old_stream_before_opening_the_new() {
        let store = MemoryStore::with_audit();
        post(&store, "a", "from a").await;
        post(&store, "b", "from b").await;
        let mut sync = sync_over(&store);

        assert!(sync.select(Some("a")));
        sync.next_event().await;
        assert_eq!(texts(&sync), vec!["from a"]);

        assert!(sync.select(Some("b")));
        assert!(sync.messages().is_empty());
        assert_eq!(store.live_subscriptions(), 1);
        sync.next_event().await;
        assert_eq!(texts(&sync), vec!["from b"]);

        assert_eq!(
            store.lifecycle(),
            vec![
                SubscriptionEvent::Opened { id: 1, collection: messages_of("a") },
                SubscriptionEvent::Closed { id: 1, collection: messages_of("a") },
                SubscriptionEvent::Opened { id: 2, collection: messages_of("b") },
            ]
        );
    }

    #[tokio::test]
    async fn stale_deliveries_never_reach_the_new_selection() {
        let store = MemoryStore::with_audit();
        let mut sync = sync_over(&store);
        sync.select(Some("a"));
        sync.next_event().await;

        // Queued on a's channel but never consumed.
        post(&store, "a", "late for a").await;
        sync.select(Some("b"));
        post(&store, "b", "hello b").await;

        sync.next_event().await;
        sync.next_event().await;
        assert_eq!(texts(&sync), vec!["hello b"]);
    }

    #[tokio::test]
    async fn reselecting_the_same_conversation_keeps_the_stream() {
        let store = MemoryStore::with_audit();
        let mut sync = sync_over(&store);
        sync.select(Some("a"));
        assert!(!sync.select(Some("a")));
        assert_eq!(store.lifecycle().len(), 1);
        assert_eq!(sync.selected_id(), Some("a"));
    }

    #[tokio::test]
    async fn deselecting_tears_down_and_clears() {
        let store = MemoryStore::with_audit();
        post(&store, "a", "hi").await;
        let mut sync = sync_over(&store);
        sync.select(Some("a"));
        sync.next_event().await;

        assert!(sync.select(None));
        assert!(sync.messages().is_empty());
        assert_eq!(sync.selected_id(), None);
        assert_eq!(store.live_subscriptions(), 0);
        assert!(!sync.select(None));
    }

    #[tokio::test]
    async fn delivered_messages_keep_timestamp_order() {
        let store = MemoryStore::with_audit();
        for text in ["one", "two", "three"] {
            post(&store, "a", text).await;
        }
        let mut sync = sync_over(&store);
        sync.select(Some("a"));
        sync.next_event().await;

        assert_eq!(texts(&sync), vec!["one", "two", "three"]);
        let stamps: Vec<_> = sync
            .messages()
            .iter()
            .map(|m| match m.timestamp {
                Some(Timestamp::Resolved(at)) => at,
                other => panic!("unexpected timestamp {:?}", other),
            })
            .collect();
        assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(sync.messages().iter().all(|m| m.sender == Role::User));
    }

    #[tokio::test]
    async fn pending_timestamps_render_as_now() {
        let store = MemoryStore::with_audit();
        store.set_resolve_timestamps(false);
        post(&store, "a", "in flight").await;
        let mut sync = sync_over(&store);
        sync.select(Some("a"));
        sync.next_event().await;

        assert_eq!(sync.messages()[0].timestamp, Some(Timestamp::Pending));
        assert_eq!(sync.messages()[0].time, "now");
    }

    #[tokio::test]
    async fn errors_keep_the_published_messages() {
        let store = MemoryStore::with_audit();
        post(&store, "a", "kept").await;
        let mut sync = sync_over(&store);
        sync.select(Some("a"));
        sync.next_event().await;

        store.emit_error(&messages_of("a"), StoreError::Unavailable("network".into()));
        assert_eq!(sync.next_event().await, SyncEvent::Failed);
        assert_eq!(texts(&sync), vec!["kept"]);
    }

    #[tokio::test]
    async fn a_stream_closed_by_the_store_is_not_reopened() {
        let store = MemoryStore::with_audit();
        post(&store, "a", "before close").await;
        let mut sync = sync_over(&store);
        sync.select(Some("a"));
        sync.next_event().await;

        store.close_subscriptions(&messages_of("a"));
        assert_eq!(sync.next_event().await, SyncEvent::Closed);
        assert!(!sync.is_streaming());
        assert_eq!(sync.selected_id(), Some("a"));
        assert_eq!(texts(&sync), vec!["before close"]);

        assert!(!sync.select(Some("a")));
        assert_eq!(store.live_subscriptions(), 0);
        let opened = store
            .lifecycle()
            .iter()
            .filter(|event| matches!(event, SubscriptionEvent::Opened { .. }))
            .count();
        assert_eq!(opened, 1);

        // A different conversation still opens normally.
        assert!(sync.select(Some("b")));
        assert!(sync.is_streaming());
        assert!(sync.messages().is_empty());
    }
}
