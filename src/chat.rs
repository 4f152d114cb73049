use crate::conversation::ConversationKey;
use crate::entity::{Identity, Peer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// The latest message of a conversation, narrowed to what a preview shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: String,
    pub text: String,
}

impl Message {
    pub fn new(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            text: text.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn is_from(&self, user: &Identity) -> bool {
        self.sender_id == user.as_str()
    }
}

/// Raw payload as it sits in the message log. Nothing about its shape is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord(Vec<u8>);

impl StoredRecord {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for StoredRecord {
    fn from(raw: &str) -> Self {
        Self(raw.as_bytes().to_vec())
    }
}

impl From<String> for StoredRecord {
    fn from(raw: String) -> Self {
        Self(raw.into_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewEntry {
    pub peer: Peer,
    pub last_message: Message,
    pub conversation: ConversationKey,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("record is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("record has an unexpected shape: {0}")]
    InvalidShape(String),
}

/// Parse a stored record into a [`Message`].
///
/// Only checks for string-typed `senderId` and `text`; anything else on the
/// record is ignored.
pub fn try_decode(record: &StoredRecord) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_slice(record.as_bytes())?;

    let field = |name: &str| value.get(name).and_then(Value::as_str);
    match (field("senderId"), field("text")) {
        (Some(sender_id), Some(text)) => Ok(Message::new(sender_id, text)),
        _ => Err(DecodeError::InvalidShape(describe(&value))),
    }
}

/// Total decode: absent or malformed records yield the empty default message.
pub fn decode(record: Option<&StoredRecord>) -> Message {
    let Some(record) = record else {
        return Message::default();
    };

    match try_decode(record) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Discarding malformed message record");
            Message::default()
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!("object with keys [{}]", keys.join(", "))
        }
        Value::Array(items) => format!("array of {} items", items.len()),
        Value::String(_) => "string".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Null => "null".to_string(),
    }
}
