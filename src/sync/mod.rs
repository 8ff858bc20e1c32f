//! Live feed synchronizers.
//!
//! Each synchronizer owns at most one [`Subscription`](crate::store::Subscription)
//! and republishes whatever the store delivers, replacing its previous list
//! wholesale. Neither ever retries; a failed delivery leaves the last good
//! list in place.

pub mod chat_list;
pub mod messages;

pub use chat_list::ChatListSynchronizer;
pub use messages::MessageStreamSynchronizer;

/// Outcome of waiting on a synchronizer's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// A snapshot arrived and replaced the published list.
    Replaced,
    /// The subscription reported an error; the list is unchanged.
    Failed,
    /// The store closed the channel; the subscription has been released.
    Closed,
}
