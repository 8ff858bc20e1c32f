use crate::chat::{ConversationSummary, Message};
use crate::composer::MessageComposer;
use crate::config::HubConfig;
use crate::filter::{filter_conversations, Tab};
use crate::store::{DocumentStore, StoreError};
use crate::sync::{ChatListSynchronizer, MessageStreamSynchronizer, SyncEvent};
use crate::typing::TypingIndicatorController;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Operator intents forwarded by the rendering surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SelectConversation(Option<usize>),
    SetSearchQuery(String),
    SetTab(Tab),
    SetComposerText(String),
    SubmitMessage,
    Shutdown,
}

/// Everything the rendering surface may read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubState {
    /// Conversations visible under the current search and tab.
    pub conversations: Vec<ConversationSummary>,
    pub total_conversations: usize,
    pub messages: Vec<Message>,
    pub selected_index: Option<usize>,
    pub selected_conversation: Option<ConversationSummary>,
    pub composer_text: String,
    pub is_counterpart_typing: bool,
    pub search_query: String,
    pub tab: Tab,
}

/// The synchronization engine. Runs as a single task that owns both
/// subscriptions and the typing timer; nothing else touches them.
pub struct Hub {
    chat_list: ChatListSynchronizer,
    messages: MessageStreamSynchronizer,
    typing: TypingIndicatorController,
    composer: MessageComposer,
    intents: mpsc::UnboundedReceiver<Intent>,
    state: watch::Sender<HubState>,
    selected_index: Option<usize>,
    selected_id: Option<String>,
    search_query: String,
    tab: Tab,
    composer_text: String,
}

impl Hub {
    /// Open the conversation feed and start the hub task.
    pub fn spawn(store: Arc<dyn DocumentStore>, config: &HubConfig) -> Result<HubHandle, StoreError> {
        let mut chat_list = ChatListSynchronizer::new(store.clone(), config.chats_collection.as_str());
        chat_list.start()?;

        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(HubState::default());

        let hub = Hub {
            chat_list,
            messages: MessageStreamSynchronizer::new(
                store.clone(),
                config.chats_collection.as_str(),
                config.messages_collection.as_str(),
            ),
            typing: TypingIndicatorController::new(
                store.clone(),
                config.chats_collection.as_str(),
                config.typing_idle,
            ),
            composer: MessageComposer::new(
                store,
                config.chats_collection.as_str(),
                config.messages_collection.as_str(),
                config.operator.clone(),
            ),
            intents: intent_rx,
            state: state_tx,
            selected_index: None,
            selected_id: None,
            search_query: String::new(),
            tab: Tab::All,
            composer_text: String::new(),
        };
        tokio::spawn(hub.run());

        Ok(HubHandle {
            intents: intent_tx,
            state: state_rx,
        })
    }

    async fn run(mut self) {
        info!("Operator hub running");

        loop {
            tokio::select! {
                intent = self.intents.recv() => match intent {
                    Some(Intent::Shutdown) | None => break,
                    Some(intent) => self.handle(intent),
                },
                event = self.chat_list.next_event() => {
                    if event == SyncEvent::Replaced {
                        self.reconcile_selection();
                        self.publish();
                    }
                }
                event = self.messages.next_event() => {
                    if event == SyncEvent::Replaced {
                        self.publish();
                    }
                }
                Some(conversation_id) = self.typing.expired() => {
                    debug!("Typing indicator cleared for {}", conversation_id);
                }
            }
        }

        self.teardown();
        info!("Operator hub stopped");
    }

    fn handle(&mut self, intent: Intent) {
        match intent {
            Intent::SelectConversation(index) => {
                self.selected_index = index;
                self.reconcile_selection();
            }
            Intent::SetSearchQuery(query) => {
                self.search_query = query;
                self.reconcile_selection();
            }
            Intent::SetTab(tab) => {
                self.tab = tab;
                self.reconcile_selection();
            }
            Intent::SetComposerText(text) => {
                self.composer_text = text;
                if let Some(conversation_id) = self.selected_id.as_deref() {
                    self.typing.on_keystroke(conversation_id);
                }
            }
            Intent::SubmitMessage => self.submit(),
            Intent::Shutdown => {}
        }
        self.publish();
    }

    fn submit(&mut self) {
        let Some(conversation_id) = self.selected_id.clone() else {
            return;
        };
        let Some(text) = MessageComposer::prepare(&self.composer_text).map(str::to_string) else {
            return;
        };

        // Cleared before the writes are confirmed and never restored.
        self.composer_text.clear();

        let composer = self.composer.clone();
        tokio::spawn(async move {
            composer.submit(&conversation_id, &text).await;
        });
    }

    fn visible(&self) -> Vec<&ConversationSummary> {
        filter_conversations(self.chat_list.conversations(), &self.search_query, self.tab)
    }

    /// Resolve the selected position against the visible list and point the
    /// message stream at whatever sits there now.
    fn reconcile_selection(&mut self) {
        let resolved = self
            .selected_index
            .and_then(|index| self.visible().get(index).map(|c| c.id.clone()));

        if resolved != self.selected_id {
            if let Some(previous) = &self.selected_id {
                debug!("Leaving conversation {}", previous);
            }
            self.typing.dispose();
            self.selected_id = resolved;
        }
        self.messages.select(self.selected_id.as_deref());
    }

    fn publish(&self) {
        let conversations: Vec<ConversationSummary> = self.visible().into_iter().cloned().collect();
        let selected_conversation = self
            .selected_index
            .and_then(|index| conversations.get(index).cloned());
        let messages = if self.selected_id.is_some() {
            self.messages.messages().to_vec()
        } else {
            Vec::new()
        };

        self.state.send_replace(HubState {
            is_counterpart_typing: selected_conversation
                .as_ref()
                .is_some_and(|c| c.user_typing),
            total_conversations: self.chat_list.conversations().len(),
            conversations,
            messages,
            selected_index: self.selected_index,
            selected_conversation,
            composer_text: self.composer_text.clone(),
            search_query: self.search_query.clone(),
            tab: self.tab,
        });
    }

    fn teardown(&mut self) {
        self.chat_list.stop();
        self.messages.select(None);
        self.typing.dispose();
    }
}

/// Cloneable front door to a running hub. When every handle is dropped the
/// hub shuts down.
#[derive(Clone)]
pub struct HubHandle {
    intents: mpsc::UnboundedSender<Intent>,
    state: watch::Receiver<HubState>,
}

impl HubHandle {
    /// Latest published state.
    pub fn state(&self) -> HubState {
        self.state.borrow().clone()
    }

    /// A receiver notified on every publish.
    pub fn watch(&self) -> watch::Receiver<HubState> {
        self.state.clone()
    }

    pub fn select_conversation(&self, index: Option<usize>) {
        self.send(Intent::SelectConversation(index));
    }

    pub fn set_search_query(&self, query: impl Into<String>) {
        self.send(Intent::SetSearchQuery(query.into()));
    }

    pub fn set_tab(&self, tab: impl Into<Tab>) {
        self.send(Intent::SetTab(tab.into()));
    }

    /// Replace the composer text; also signals that the operator is typing.
    pub fn set_composer_text(&self, text: impl Into<String>) {
        self.send(Intent::SetComposerText(text.into()));
    }

    pub fn submit_message(&self) {
        self.send(Intent::SubmitMessage);
    }

    pub fn is_running(&self) -> bool {
        !self.intents.is_closed()
    }

    /// Stop the hub and wait until it has released its subscriptions.
    pub async fn shutdown(&self) {
        self.send(Intent::Shutdown);
        self.intents.closed().await;
    }

    fn send(&self, intent: Intent) {
        if self.intents.send(intent).is_err() {
            warn!("Operator hub is not running; intent dropped");
        }
    }
}
