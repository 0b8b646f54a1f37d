use serde::{Deserialize, Serialize};

/// Lightweight reference to a remote message, as returned by a list query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: Option<String>,
}

impl MessageRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
        }
    }

    pub fn with_thread(id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: Some(thread_id.into()),
        }
    }
}

/// A single `name: value` header pair from message metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Metadata-format view of a message: requested headers plus label set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeaders {
    pub id: String,
    pub thread_id: Option<String>,
    pub headers: Vec<Header>,
    pub label_ids: Vec<String>,
}

impl MessageHeaders {
    /// First header with exactly this name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }
}

/// Ephemeral outbound reply, built per message and dropped after submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyDraft {
    pub from: String,
    pub recipient: String,
    pub subject: String,
    pub in_reply_to: String,
    pub thread_id: Option<String>,
    pub body: String,
}
