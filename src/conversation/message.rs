//! Message and page types shared by the store, the gateway and consumers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Id carried by the assistant reply while it is still being streamed.
pub const STREAMING_MESSAGE_ID: &str = "ai-response";

/// Id of the transient "thinking" placeholder shown before the first chunk.
pub const LOADING_MESSAGE_ID: &str = "loading-message";

/// Identifier of a message.
///
/// Server-assigned ids are opaque strings. Locally synthesized messages get a
/// random UUID, and two reserved values mark the streaming reply and the
/// thinking placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id for an optimistic, locally created message.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn streaming() -> Self {
        Self(STREAMING_MESSAGE_ID.to_string())
    }

    #[must_use]
    pub fn loading() -> Self {
        Self(LOADING_MESSAGE_ID.to_string())
    }

    pub fn is_streaming(&self) -> bool {
        self.0 == STREAMING_MESSAGE_ID
    }

    pub fn is_loading(&self) -> bool {
        self.0 == LOADING_MESSAGE_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A single chat message.
///
/// Authorship and creation time never change. The text only changes while the
/// message carries the streaming id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: MessageId,
    text: String,
    is_user_message: bool,
    #[serde(alias = "createAt")]
    created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        text: impl Into<String>,
        is_user_message: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            is_user_message,
            created_at,
        }
    }

    /// Optimistic user message with a freshly generated id.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageId::generate(), text, true, Utc::now())
    }

    /// Assistant reply that is still being written.
    pub fn streaming(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self::new(MessageId::streaming(), text, false, created_at)
    }

    /// Placeholder shown while waiting for the first reply chunk.
    pub fn thinking() -> Self {
        Self::new(MessageId::loading(), String::new(), false, Utc::now())
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_user_message(&self) -> bool {
        self.is_user_message
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_streaming(&self) -> bool {
        self.id.is_streaming()
    }

    /// Replace the text of a streaming message. Returns false (and leaves the
    /// message untouched) for any other message.
    pub(crate) fn replace_text(&mut self, text: &str) -> bool {
        if !self.is_streaming() {
            return false;
        }
        self.text.clear();
        self.text.push_str(text);
        true
    }

    pub(crate) fn rekey(&mut self, id: MessageId) {
        self.id = id;
    }
}

/// One page of history as returned by the server, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl ConversationPage {
    pub fn new(messages: Vec<Message>, next_cursor: Option<String>) -> Self {
        Self {
            messages,
            next_cursor,
        }
    }

    /// Whether the page points at further history.
    pub fn has_next(&self) -> bool {
        self.next_cursor.as_deref().is_some_and(|c| !c.is_empty())
    }
}
