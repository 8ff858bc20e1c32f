use crate::entity::Role;
use crate::store::{decode_timestamp, is_server_timestamp, Document};
use crate::time::format_time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record field names shared with the customer-side widget.
pub mod fields {
    pub const USER_NAME: &str = "userName";
    pub const USER_EMAIL: &str = "userEmail";
    pub const LAST_MESSAGE: &str = "lastMessage";
    pub const LAST_ACTIVITY: &str = "lastActivity";
    pub const UNREAD_COUNT: &str = "unreadCount";
    pub const STATUS: &str = "status";
    pub const ADMIN_TYPING: &str = "adminTyping";
    pub const USER_TYPING: &str = "userTyping";

    pub const TEXT: &str = "text";
    pub const SENDER: &str = "sender";
    pub const SENDER_NAME: &str = "senderName";
    pub const SENDER_EMAIL: &str = "senderEmail";
    pub const TIMESTAMP: &str = "timestamp";
}

pub const ANONYMOUS_USER: &str = "Anonymous User";
pub const UNKNOWN_SENDER: &str = "Unknown";

/// A timestamp as read back from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "at", rename_all = "lowercase")]
pub enum Timestamp {
    /// Written with the server sentinel and not yet resolved.
    Pending,
    Resolved(DateTime<Utc>),
}

impl Timestamp {
    /// Absent, null and unparseable values all read as `None`.
    pub fn from_field(value: Option<&Value>) -> Option<Self> {
        let value = value?;
        if is_server_timestamp(value) {
            return Some(Timestamp::Pending);
        }
        decode_timestamp(value).map(Timestamp::Resolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    #[default]
    Online,
    Away,
    Offline,
}

impl Presence {
    /// Missing status means online; unrecognised values are shown as offline.
    fn from_field(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            None | Some("") | Some("online") => Presence::Online,
            Some("away") => Presence::Away,
            Some(_) => Presence::Offline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Unread,
    Unassigned,
    /// Never derived from a snapshot; kept so the archive tab has a target.
    Archived,
}

impl Category {
    pub fn from_unread(unread: u32) -> Self {
        if unread > 0 {
            Category::Unread
        } else {
            Category::Unassigned
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub user_name: String,
    pub user_email: String,
    pub last_message: Option<String>,
    pub last_activity: Option<Timestamp>,
    /// `None` stands for zero.
    pub unread_count: Option<u32>,
    pub status: Presence,
    pub category: Option<Category>,
    pub user_typing: bool,
}

impl ConversationSummary {
    pub fn from_document(doc: &Document) -> Self {
        let data = &doc.fields;
        let unread_count = data.get(fields::UNREAD_COUNT).and_then(read_count);

        Self {
            id: doc.id.clone(),
            user_name: read_text(data.get(fields::USER_NAME))
                .unwrap_or_else(|| ANONYMOUS_USER.to_string()),
            user_email: read_text(data.get(fields::USER_EMAIL)).unwrap_or_default(),
            last_message: read_text(data.get(fields::LAST_MESSAGE)),
            last_activity: Timestamp::from_field(data.get(fields::LAST_ACTIVITY)),
            unread_count,
            status: Presence::from_field(data.get(fields::STATUS)),
            category: Some(Category::from_unread(unread_count.unwrap_or(0))),
            user_typing: data
                .get(fields::USER_TYPING)
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    pub fn unread(&self) -> u32 {
        self.unread_count.unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Role,
    pub sender_name: String,
    pub timestamp: Option<Timestamp>,
    /// Display label derived from `timestamp`.
    pub time: String,
}

impl Message {
    pub fn from_document(doc: &Document) -> Self {
        let data = &doc.fields;
        let timestamp = Timestamp::from_field(data.get(fields::TIMESTAMP));

        Self {
            id: doc.id.clone(),
            text: data
                .get(fields::TEXT)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            sender: data
                .get(fields::SENDER)
                .and_then(Value::as_str)
                .map(Role::parse)
                .unwrap_or(Role::User),
            sender_name: read_text(data.get(fields::SENDER_NAME))
                .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
            timestamp,
            time: format_time(timestamp.as_ref()),
        }
    }
}

/// Non-empty string field.
fn read_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Positive integral count. Zero, negatives and fractions read as absent.
fn read_count(value: &Value) -> Option<u32> {
    let count = match value.as_u64() {
        Some(count) => count,
        None => {
            let float = value.as_f64()?;
            if float.fract() != 0.0 || float < 0.0 {
                return None;
            }
            float as u64
        }
    };
    u32::try_from(count).ok().filter(|count| *count > 0)
}
