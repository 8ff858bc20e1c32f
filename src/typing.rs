use crate::chat::fields;
use crate::store::{CollectionPath, DocumentStore, Fields};
use crate::timer::DebounceTimer;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Debounced "operator is typing" flag.
///
/// Every keystroke writes `true` straight away and restarts a single idle
/// timer; only when the timer runs out is `false` written, so a burst of
/// keystrokes yields exactly one clear.
pub struct TypingIndicatorController {
    store: Arc<dyn DocumentStore>,
    conversations: CollectionPath,
    idle: Duration,
    target: Option<String>,
    timer: DebounceTimer,
}

impl TypingIndicatorController {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>, idle: Duration) -> Self {
        Self {
            store,
            conversations: CollectionPath::root(collection),
            idle,
            target: None,
            timer: DebounceTimer::new(),
        }
    }

    pub fn on_keystroke(&mut self, conversation_id: &str) {
        self.write_flag(conversation_id, true);

        self.timer.cancel();
        if self.target.as_deref() != Some(conversation_id) {
            debug!("Typing indicator now targets {}", conversation_id);
            self.target = Some(conversation_id.to_string());
        }
        self.timer.arm(self.idle);
    }

    /// Waits for the idle timer, clears the flag on the targeted conversation
    /// and returns its id. Pends forever while disarmed. Cancel-safe.
    pub async fn expired(&mut self) -> Option<String> {
        self.timer.fired().await;
        let conversation_id = self.target.clone()?;
        self.write_flag(&conversation_id, false);
        Some(conversation_id)
    }

    /// Drop any pending clear without writing it.
    pub fn dispose(&mut self) {
        if self.timer.cancel() {
            debug!("Typing indicator disposed with a pending clear");
        }
        self.target = None;
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_armed()
    }

    fn write_flag(&self, conversation_id: &str, typing: bool) {
        let store = self.store.clone();
        let doc = self.conversations.doc(conversation_id);
        let mut update = Fields::new();
        update.insert(fields::ADMIN_TYPING.to_string(), Value::Bool(typing));

        tokio::spawn(async move {
            if let Err(e) = store.update(&doc, update).await {
                warn!("Failed to set typing flag on {}: {}", doc, e);
            }
        });
    }
}
