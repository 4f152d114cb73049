//! Canonical addressing of one-to-one conversations.
//!
//! A conversation between two users is identified by joining their sorted
//! identities with [`KEY_DELIMITER`]. Identities that could make the join
//! ambiguous are rejected, so every key maps back to exactly one pair.

use crate::entity::Identity;
use crate::error::{PreviewError, Result};
use serde::Serialize;
use std::fmt;

pub const KEY_DELIMITER: &str = "--";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Derive the key for the conversation between `a` and `b`.
    /// Symmetric: `derive(a, b) == derive(b, a)`.
    pub fn derive(a: &Identity, b: &Identity) -> Result<Self> {
        validate(a)?;
        validate(b)?;

        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self(format!("{}{}{}", first, KEY_DELIMITER, second)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two participants, in canonical order.
    pub fn participants(&self) -> (Identity, Identity) {
        // Neither side may contain the delimiter or touch it with a '-',
        // so the first occurrence is the join.
        match self.0.split_once(KEY_DELIMITER) {
            Some((first, second)) => (Identity::new(first), Identity::new(second)),
            None => (Identity::new(self.0.as_str()), Identity::new("")),
        }
    }

    /// Address of the message log for this conversation.
    pub fn log_key(&self) -> String {
        format!("chat:{}:messages", self.0)
    }

    /// Link target of the conversation view.
    pub fn chat_href(&self) -> String {
        format!("/dashboard/chat/{}", self.0)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate(id: &Identity) -> Result<()> {
    let raw = id.as_str();
    let reason = if raw.is_empty() {
        "empty identity"
    } else if raw.contains(KEY_DELIMITER) {
        "contains the key delimiter"
    } else if raw.starts_with('-') {
        "starts with '-'"
    } else if raw.ends_with('-') {
        "ends with '-'"
    } else {
        return Ok(());
    };

    Err(PreviewError::InvalidIdentity {
        identity: raw.to_string(),
        reason,
    })
}
