//! Realtime synchronization and composition engine for a support-chat
//! operator console.
//!
//! The [`Hub`] keeps a live conversation list, streams the selected
//! conversation's messages, debounces the operator typing flag and sends
//! replies, all against a [`DocumentStore`]. A rendering surface reads
//! [`HubState`] and forwards intents through a [`HubHandle`].

pub mod chat;
pub mod composer;
pub mod config;
pub mod entity;
pub mod filter;
pub mod hub;
pub mod store;
pub mod surface;
pub mod sync;
pub mod time;
pub mod timer;
pub mod typing;

pub use chat::{Category, ConversationSummary, Message, Presence, Timestamp};
pub use config::HubConfig;
pub use filter::{filter_conversations, Tab};
pub use hub::{Hub, HubHandle, HubState, Intent};
pub use store::{DocumentStore, MemoryStore, StoreError};
