//! Ordered, append-only conversation transcript with snapshot notifications.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::{ChatError, StreamFailure};
use crate::message::{Message, MessageEdit, MessageId};

/// Immutable copy of the transcript at one point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct TranscriptSnapshot {
    version: u64,
    messages: Arc<[Message]>,
}

impl TranscriptSnapshot {
    /// Increments once per notification.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The message still receiving content, if any.
    pub fn pending(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_pending())
    }
}

/// Notification delivered to transcript subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum TranscriptEvent {
    /// The transcript changed.
    Updated(TranscriptSnapshot),
    /// A session ended in failure. Partial text stays in the transcript.
    StreamFailed {
        message_id: MessageId,
        failure: StreamFailure,
    },
}

/// Holds the ordered conversation and notifies subscribers on every change.
#[derive(Debug, Default)]
pub struct TranscriptStore {
    messages: Vec<Message>,
    version: u64,
    subscribers: Vec<mpsc::UnboundedSender<TranscriptEvent>>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer. Every later change is delivered in order.
    ///
    /// The channel is unbounded and each update carries a full snapshot, so
    /// a receiver that is kept alive but never drained grows without limit.
    /// Drop receivers that are no longer read; they are pruned on next send.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TranscriptEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Appends a message at the end.
    ///
    /// Fails if the message is pending while another pending one exists.
    pub fn append(&mut self, message: Message) -> Result<(), ChatError> {
        if message.is_pending()
            && let Some(existing) = self.messages.iter().find(|m| m.is_pending())
        {
            return Err(ChatError::invariant(format!(
                "cannot append pending message {} while {} is pending",
                message.id(),
                existing.id()
            )));
        }
        debug!(message_id = %message.id(), role = ?message.role(), pending = message.is_pending(), "transcript append");
        self.messages.push(message);
        self.notify_updated();
        Ok(())
    }

    /// Applies `edit` to the message with `id`. No-op when nothing matches.
    ///
    /// Returns whether a message was found.
    pub fn update_by_id(&mut self, id: MessageId, edit: impl FnOnce(&mut MessageEdit<'_>)) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id() == id) else {
            debug!(message_id = %id, "transcript update skipped: no such message");
            return false;
        };
        edit(&mut MessageEdit::new(message));
        self.notify_updated();
        true
    }

    /// Tells subscribers a session failed. The transcript itself is unchanged.
    pub fn report_failure(&mut self, message_id: MessageId, failure: StreamFailure) {
        self.broadcast(TranscriptEvent::StreamFailed {
            message_id,
            failure,
        });
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            version: self.version,
            messages: Arc::from(self.messages.as_slice()),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Looks up a message by id.
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id() == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn notify_updated(&mut self) {
        self.version = self.version.saturating_add(1);
        let snapshot = self.snapshot();
        self.broadcast(TranscriptEvent::Updated(snapshot));
    }

    fn broadcast(&mut self, event: TranscriptEvent) {
        // closed receivers are pruned
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_keeps_order_and_notifies() {
        let mut store = TranscriptStore::new();
        let mut events = store.subscribe();
        store.append(Message::user("one")).expect("append");
        store.append(Message::assistant("two")).expect("append");

        let texts: Vec<_> = store.messages().iter().map(|m| m.text().to_string()).collect();
        assert_eq!(texts, vec!["one", "two"]);

        let Ok(TranscriptEvent::Updated(first)) = events.try_recv() else {
            panic!("expected first snapshot");
        };
        assert_eq!(first.len(), 1);
        let Ok(TranscriptEvent::Updated(second)) = events.try_recv() else {
            panic!("expected second snapshot");
        };
        assert_eq!(second.len(), 2);
        assert!(second.version() > first.version());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn second_pending_message_is_rejected() {
        let mut store = TranscriptStore::new();
        store.append(Message::pending_assistant()).expect("first pending");
        let err = store
            .append(Message::pending_assistant())
            .expect_err("second pending");
        assert!(matches!(err, ChatError::InvariantViolation(_)));
        assert_eq!(store.len(), 1);
        store.append(Message::user("fine")).expect("non-pending ok");
    }

    #[test]
    fn update_by_unknown_id_is_a_silent_no_op() {
        let mut store = TranscriptStore::new();
        store.append(Message::user("hi")).expect("append");
        let mut events = store.subscribe();
        assert!(!store.update_by_id(MessageId::new(), |edit| {
            edit.append_text("x");
        }));
        assert!(events.try_recv().is_err());
        assert_eq!(store.messages()[0].text(), "hi");
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutations() {
        let mut store = TranscriptStore::new();
        let pending = Message::pending_assistant();
        let id = pending.id();
        store.append(pending).expect("append");
        let before = store.snapshot();
        store.update_by_id(id, |edit| {
            edit.append_text("grown");
            edit.finalize();
        });
        assert_eq!(before.messages()[0].text(), "");
        assert!(before.pending().is_some());
        let after = store.snapshot();
        assert_eq!(after.messages()[0].text(), "grown");
        assert!(after.pending().is_none());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut store = TranscriptStore::new();
        let events = store.subscribe();
        drop(events);
        store.append(Message::user("hi")).expect("append");
        assert!(store.subscribers.is_empty());
    }

    #[test]
    fn failure_report_reaches_subscribers() {
        let mut store = TranscriptStore::new();
        let mut events = store.subscribe();
        let id = MessageId::new();
        store.report_failure(id, StreamFailure::Cancelled);
        assert_eq!(
            events.try_recv().expect("event"),
            TranscriptEvent::StreamFailed {
                message_id: id,
                failure: StreamFailure::Cancelled
            }
        );
    }
}
