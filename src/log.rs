//! Collaborators the aggregator reads from.

use async_trait::async_trait;

use crate::chat::StoredRecord;
use crate::conversation::ConversationKey;
use crate::entity::{Identity, Peer};
use crate::error::Result;

/// Read access to the append-only, score-ordered per-conversation log.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// The most recent record of the conversation, or `None` if it has none yet.
    async fn latest(&self, key: &ConversationKey) -> Result<Option<StoredRecord>>;
}

/// Source of a user's friends.
#[async_trait]
pub trait FriendGraph: Send + Sync {
    /// Friends of `user`, in the graph's own order.
    async fn peers_of(&self, user: &Identity) -> Result<Vec<Peer>>;
}
