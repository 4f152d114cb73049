//! Recent-chats feed: the latest message of every conversation a user has
//! with their friends, decoded defensively and filtered to non-empty previews.

pub mod aggregator;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod entity;
pub mod error;
pub mod log;
pub mod server;
pub mod store;

pub use aggregator::PreviewAggregator;
pub use chat::{decode, Message, PreviewEntry, StoredRecord};
pub use conversation::ConversationKey;
pub use entity::{Identity, Peer};
pub use error::{PreviewError, Result};
pub use log::{FriendGraph, MessageLog};
