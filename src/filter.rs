use crate::chat::{Category, ConversationSummary};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Conversation list tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    All,
    Unread,
    Unassigned,
    Archived,
}

impl From<&str> for Tab {
    /// Unknown tab names show everything.
    fn from(name: &str) -> Self {
        match name {
            "unread" => Tab::Unread,
            "unassigned" => Tab::Unassigned,
            "archived" => Tab::Archived,
            _ => Tab::All,
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tab::All => "all",
            Tab::Unread => "unread",
            Tab::Unassigned => "unassigned",
            Tab::Archived => "archived",
        };
        f.write_str(name)
    }
}

impl Tab {
    fn admits(&self, conversation: &ConversationSummary) -> bool {
        match self {
            Tab::All => true,
            Tab::Unread => {
                conversation.category == Some(Category::Unread) || conversation.unread() > 0
            }
            Tab::Unassigned => conversation.category == Some(Category::Unassigned),
            Tab::Archived => conversation.category == Some(Category::Archived),
        }
    }
}

/// Visible subset of `conversations` for a search query and tab, in input
/// order.
pub fn filter_conversations<'a>(
    conversations: &'a [ConversationSummary],
    query: &str,
    tab: Tab,
) -> Vec<&'a ConversationSummary> {
    let needle = query.to_lowercase();
    conversations
        .iter()
        .filter(|conversation| needle.is_empty() || matches_search(conversation, &needle))
        .filter(|conversation| tab.admits(conversation))
        .collect()
}

fn matches_search(conversation: &ConversationSummary, needle: &str) -> bool {
    conversation.user_name.to_lowercase().contains(needle)
        || conversation
            .last_message
            .as_deref()
            .is_some_and(|text| text.to_lowercase().contains(needle))
        || conversation.user_email.to_lowercase().contains(needle)
}
