use crate::chat::fields;
use crate::entity::{Operator, Role};
use crate::store::{server_timestamp, CollectionPath, DocumentStore, Fields};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// How a send attempt ended. Failures are already logged; callers only need
/// this for bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank text; nothing was written.
    Skipped,
    Sent,
    /// The message append failed; the summary was left alone.
    MessageFailed,
    /// The message is recorded but the conversation summary is stale.
    SummaryFailed,
}

/// Sends operator replies.
///
/// A send is two independent writes: append the message, then refresh the
/// conversation summary. There is no transaction between them.
#[derive(Clone)]
pub struct MessageComposer {
    store: Arc<dyn DocumentStore>,
    collection: String,
    sub_collection: String,
    operator: Operator,
}

impl MessageComposer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        sub_collection: impl Into<String>,
        operator: Operator,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            sub_collection: sub_collection.into(),
            operator,
        }
    }

    /// The text that would be sent, or `None` if it is blank.
    pub fn prepare(text: &str) -> Option<&str> {
        let text = text.trim();
        (!text.is_empty()).then_some(text)
    }

    pub async fn submit(&self, conversation_id: &str, text: &str) -> SendOutcome {
        let Some(text) = Self::prepare(text) else {
            return SendOutcome::Skipped;
        };

        let messages = CollectionPath::sub(
            self.collection.as_str(),
            conversation_id,
            self.sub_collection.as_str(),
        );
        let mut message = Fields::new();
        message.insert(fields::TEXT.to_string(), Value::from(text));
        message.insert(fields::SENDER.to_string(), Value::from(Role::Admin.as_str()));
        message.insert(fields::SENDER_NAME.to_string(), Value::from(self.operator.name.as_str()));
        message.insert(fields::SENDER_EMAIL.to_string(), Value::from(self.operator.email.as_str()));
        message.insert(fields::TIMESTAMP.to_string(), server_timestamp());

        match self.store.append(&messages, message).await {
            Ok(id) => debug!("Appended message {} to {}", id, messages),
            Err(e) => {
                error!("Error sending message to {}: {}", conversation_id, e);
                return SendOutcome::MessageFailed;
            }
        }

        let summary = CollectionPath::root(self.collection.as_str()).doc(conversation_id);
        let mut update = Fields::new();
        update.insert(fields::LAST_ACTIVITY.to_string(), server_timestamp());
        update.insert(fields::LAST_MESSAGE.to_string(), Value::from(text));
        update.insert(fields::ADMIN_TYPING.to_string(), Value::Bool(false));

        if let Err(e) = self.store.update(&summary, update).await {
            error!("Message sent but summary update failed for {}: {}", conversation_id, e);
            return SendOutcome::SummaryFailed;
        }

        SendOutcome::Sent
    }
}
