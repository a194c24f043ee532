use std::fmt;

use chrono::{DateTime, Utc};

/// Opaque, unique identifier for a transcript entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MessageId(uuid::Uuid);

impl MessageId {
    /// Allocates a fresh id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Author of a transcript entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry.
///
/// `id`, `role` and `created_at` never change. `text` only grows, and only
/// while the entry is pending. `pending` goes from true to false exactly once.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    id: MessageId,
    role: Role,
    text: String,
    created_at: DateTime<Utc>,
    pending: bool,
}

impl Message {
    /// Creates a finalized user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_state(Role::User, text.into(), false)
    }

    /// Creates a finalized assistant message, e.g. to seed prior history.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_state(Role::Assistant, text.into(), false)
    }

    /// Creates an empty assistant message that is still receiving content.
    pub fn pending_assistant() -> Self {
        Self::with_state(Role::Assistant, String::new(), true)
    }

    fn with_state(role: Role, text: String, pending: bool) -> Self {
        Self {
            id: MessageId::new(),
            role,
            text,
            created_at: Utc::now(),
            pending,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// Restricted mutable view handed to `TranscriptStore::update_by_id`.
///
/// Only append and finalize are exposed, so the append-only text and
/// monotonic `pending` rules cannot be broken from outside the crate.
pub struct MessageEdit<'a> {
    message: &'a mut Message,
}

impl<'a> MessageEdit<'a> {
    pub(crate) fn new(message: &'a mut Message) -> Self {
        Self { message }
    }

    /// Appends text. Ignored (returns false) once the message is finalized.
    pub fn append_text(&mut self, content: &str) -> bool {
        if !self.message.pending {
            tracing::warn!(message_id = %self.message.id, "ignoring append to finalized message");
            return false;
        }
        self.message.text.push_str(content);
        true
    }

    /// Clears the pending flag. Returns false if it was already cleared.
    pub fn finalize(&mut self) -> bool {
        std::mem::replace(&mut self.message.pending, false)
    }

    pub fn message(&self) -> &Message {
        self.message
    }
}
