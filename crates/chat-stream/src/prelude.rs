//! Common imports for typical chat usage.
pub use crate::{
    AbortHandle, ChatConfig, ChatError, Conversation, ConversationHandle, Message, MessageId, Role,
    SessionOutcome, SessionStatus, StreamFailure, StreamingSession, TranscriptEvent,
    TranscriptSnapshot,
};
