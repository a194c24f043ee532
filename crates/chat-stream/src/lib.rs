//! Streaming chat completion consumption and transcript reconciliation.
//!
//! A [`Conversation`] owns an append-only transcript. Each user turn runs a
//! [`StreamingSession`] that opens one completion stream, folds its content
//! fragments into a single pending assistant message, and notifies observers
//! with a fresh snapshot after every change.
//!
//! ```no_run
//! use chat_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ChatError> {
//! let mut conversation = Conversation::connect(ChatConfig::from_env()?)?;
//! let mut events = conversation.subscribe();
//!
//! let outcome = conversation.send("Hello").await?;
//! println!("{}", outcome.text);
//!
//! while let Ok(event) = events.try_recv() {
//!     if let TranscriptEvent::StreamFailed { failure, .. } = event {
//!         eprintln!("stream failed: {failure}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Delta folding for one in-flight response.
pub mod accumulator;
/// Injected client configuration.
pub mod config;
/// Conversation owner and its spawned, serialized runtime.
pub mod conversation;
/// Public error types.
pub mod errors;
/// Stream line buffering and event frame parsing.
pub mod frame;
/// Transcript to request-context projection.
pub mod history;
/// Transcript entries.
pub mod message;
/// Tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Streaming session state machine.
pub mod session;
/// Ordered transcript store with snapshot notifications.
pub mod transcript;
/// Completion request body and transports.
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use accumulator::DeltaAccumulator;
pub use config::ChatConfig;
pub use conversation::{Conversation, ConversationHandle};
pub use errors::{ChatError, StreamFailure, TransportError};
pub use frame::{Delta, DeltaRecord, FrameParser, LineBuffer};
pub use history::{ChatRole, ChatTurn, build_history};
pub use message::{Message, MessageEdit, MessageId, Role};
pub use observability::init_tracing;
pub use session::{AbortHandle, SessionOutcome, SessionState, SessionStatus, StreamingSession};
pub use transcript::{TranscriptEvent, TranscriptSnapshot, TranscriptStore};
pub use transport::{ByteStream, CompletionRequest, CompletionTransport, HttpTransport};
