use super::SyncEvent;
use crate::chat::{fields, ConversationSummary};
use crate::store::{Direction, DocumentStore, Query, StoreError, Subscription};
use std::future;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Keeps the conversation list in step with the store, newest activity
/// first.
pub struct ChatListSynchronizer {
    store: Arc<dyn DocumentStore>,
    collection: String,
    subscription: Option<Subscription>,
    conversations: Vec<ConversationSummary>,
}

impl ChatListSynchronizer {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            subscription: None,
            conversations: Vec::new(),
        }
    }

    /// Open the conversation subscription. No-op while already live.
    pub fn start(&mut self) -> Result<(), StoreError> {
        if self.subscription.is_some() {
            return Ok(());
        }

        let query = Query::ordered(
            self.collection.as_str(),
            fields::LAST_ACTIVITY,
            Direction::Descending,
        );
        let subscription = self.store.subscribe(query)?;
        debug!("Listening to conversations in '{}'", self.collection);
        self.subscription = Some(subscription);
        Ok(())
    }

    /// Release the subscription. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            debug!("Stopped listening to conversations in '{}'", self.collection);
            subscription.close();
        }
    }

    pub fn is_live(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    /// Wait for the next delivery and apply it. Pends forever while stopped.
    /// Cancel-safe.
    pub async fn next_event(&mut self) -> SyncEvent {
        let Some(subscription) = self.subscription.as_mut() else {
            return future::pending().await;
        };

        match subscription.next().await {
            Some(Ok(snapshot)) => {
                debug!("Conversation snapshot received: {} chats", snapshot.documents.len());
                self.conversations = snapshot
                    .documents
                    .iter()
                    .map(ConversationSummary::from_document)
                    .collect();
                SyncEvent::Replaced
            }
            Some(Err(e)) => {
                error!("Conversation subscription error: {}", e);
                SyncEvent::Failed
            }
            None => {
                warn!("Conversation subscription closed by the store");
                self.subscription = None;
                SyncEvent::Closed
            }
        }
    }
}
