//! Error types for recent-chats

use std::time::Duration;
use thiserror::Error;

/// Errors raised while assembling a recent-chats feed.
///
/// Only the upstream variants ever reach a caller of
/// [`PreviewAggregator::recent_chats`](crate::aggregator::PreviewAggregator::recent_chats);
/// per-peer failures are absorbed by the aggregator and degrade to an empty preview.
#[derive(Error, Debug)]
pub enum PreviewError {
    /// Identity cannot be used to address a conversation
    #[error("invalid identity {identity:?}: {reason}")]
    InvalidIdentity {
        identity: String,
        reason: &'static str,
    },

    /// Message log could not be reached or refused the read
    #[error("message log unavailable: {0}")]
    StoreUnavailable(String),

    /// Message log did not answer in time
    #[error("message log timed out after {0:?}")]
    Timeout(Duration),

    /// User unknown to the friend graph
    #[error("user not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, PreviewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_identity_message_names_the_identity() {
        let err = PreviewError::InvalidIdentity {
            identity: "-x".into(),
            reason: "starts with '-'",
        };
        assert_eq!(err.to_string(), "invalid identity \"-x\": starts with '-'");
    }
}
