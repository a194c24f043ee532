//! One request/response streaming cycle.
//!
//! ```text
//! Idle -> BuildingRequest -> Open -> Streaming -> Finalizing -> Closed
//!                             |         |
//!                             +---------+--> Finalizing (error / cancel)
//! ```
//!
//! A session owns exactly one pending assistant message. Every path out of
//! `Open`/`Streaming` clears its pending flag, and the partial text stays.

use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::accumulator::DeltaAccumulator;
use crate::config::ChatConfig;
use crate::errors::{ChatError, StreamFailure};
use crate::frame::{DeltaRecord, FrameParser, LineBuffer};
use crate::history::request_messages;
use crate::message::{Message, MessageId};
use crate::transcript::TranscriptStore;
use crate::transport::{CompletionRequest, CompletionTransport};

/// Lifecycle state of a [`StreamingSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    BuildingRequest,
    Open,
    Streaming,
    Finalizing,
    Closed,
}

/// Handle used to request cancellation of a running session.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The session closes the stream and finalizes its message with
    /// `StreamFailure::Cancelled`. Has no effect once the session is closed.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// How a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Completed,
    Failed(StreamFailure),
}

/// Result of a closed session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: uuid::Uuid,
    /// The assistant message this session filled.
    pub message_id: MessageId,
    /// Text accumulated before the session closed.
    pub text: String,
    pub finish_reason: Option<String>,
    /// Number of delta records applied.
    pub deltas: u64,
    pub status: SessionStatus,
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, SessionStatus::Completed)
    }

    pub fn failure(&self) -> Option<&StreamFailure> {
        match &self.status {
            SessionStatus::Completed => None,
            SessionStatus::Failed(failure) => Some(failure),
        }
    }
}

/// Drives one user turn from request construction to stream closure.
pub struct StreamingSession<'a> {
    id: uuid::Uuid,
    config: Arc<ChatConfig>,
    transport: Arc<dyn CompletionTransport>,
    store: &'a mut TranscriptStore,
    state: SessionState,
    request: Option<CompletionRequest>,
    pending_id: Option<MessageId>,
    accumulator: DeltaAccumulator,
    failure: Option<StreamFailure>,
    abort: AbortHandle,
    abort_rx: watch::Receiver<bool>,
}

impl<'a> StreamingSession<'a> {
    pub fn new(
        config: Arc<ChatConfig>,
        transport: Arc<dyn CompletionTransport>,
        store: &'a mut TranscriptStore,
    ) -> Self {
        let (tx, abort_rx) = watch::channel(false);
        Self {
            id: uuid::Uuid::new_v4(),
            config,
            transport,
            store,
            state: SessionState::Idle,
            request: None,
            pending_id: None,
            accumulator: DeltaAccumulator::new(),
            failure: None,
            abort: AbortHandle { tx },
            abort_rx,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The request built by [`submit`](Self::submit), until `run` sends it.
    pub fn request(&self) -> Option<&CompletionRequest> {
        self.request.as_ref()
    }

    /// The assistant message owned by this session, once opened.
    pub fn pending_id(&self) -> Option<MessageId> {
        self.pending_id
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        self.accumulator.text()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Appends the user message and builds the outgoing request.
    ///
    /// History is projected after the user message is appended, so the
    /// request ends with the new user turn.
    pub fn submit(&mut self, text: impl Into<String>) -> Result<&CompletionRequest, ChatError> {
        self.expect_state(SessionState::Idle, "submit")?;
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ChatError::Validation("user text must not be empty".into()));
        }

        self.state = SessionState::BuildingRequest;
        self.store.append(Message::user(text))?;
        let messages = request_messages(&self.config.system_prompt, self.store.messages());
        debug!(session_id = %self.id, turns = messages.len(), "request built");
        Ok(self
            .request
            .insert(CompletionRequest::streaming(self.config.model.clone(), messages)))
    }

    /// Opens the stream and applies records until the session closes.
    ///
    /// Transport and stream failures end in `Ok` with a failed status. `Err`
    /// is reserved for misuse (running twice, a pending-message conflict) and
    /// for an abort requested before the run started, which closes the
    /// session like [`cancel`](Self::cancel) without an assistant entry.
    pub async fn run(&mut self) -> Result<SessionOutcome, ChatError> {
        let span = info_span!("session", session_id = %self.id, message_id = tracing::field::Empty);
        self.drive().instrument(span).await
    }

    async fn drive(&mut self) -> Result<SessionOutcome, ChatError> {
        self.expect_state(SessionState::BuildingRequest, "run")?;
        if *self.abort_rx.borrow() {
            self.cancel();
            return Err(ChatError::SessionClosed(
                "session cancelled before the stream opened".into(),
            ));
        }
        let Some(request) = self.request.take() else {
            return Err(ChatError::invariant("session has no request to send"));
        };

        let pending = Message::pending_assistant();
        let pending_id = pending.id();
        if let Err(err) = self.store.append(pending) {
            self.state = SessionState::Closed;
            return Err(err);
        }
        self.pending_id = Some(pending_id);
        tracing::Span::current().record("message_id", tracing::field::display(pending_id));
        self.state = SessionState::Open;
        info!(session_id = %self.id, message_id = %pending_id, model = %request.model, "session open");

        let opened = tokio::select! {
            biased;
            _ = wait_for_abort(&mut self.abort_rx) => None,
            opened = self.transport.open_stream(request) => Some(opened),
        };
        let mut bytes = match opened {
            None => {
                self.finish(Some(StreamFailure::Cancelled));
                return self.closed_outcome();
            }
            Some(Err(err)) => {
                self.finish(Some(StreamFailure::from(err)));
                return self.closed_outcome();
            }
            Some(Ok(bytes)) => bytes,
        };

        let mut lines = LineBuffer::default();
        let mut parser = FrameParser::new();
        while self.state != SessionState::Closed {
            let next = tokio::select! {
                biased;
                _ = wait_for_abort(&mut self.abort_rx) => None,
                next = bytes.next() => Some(next),
            };
            let Some(next) = next else {
                self.finish(Some(StreamFailure::Cancelled));
                break;
            };
            match next {
                Some(Ok(chunk)) => {
                    let complete = lines.push_chunk(&chunk);
                    for record in parser.parse_chunk(&complete) {
                        self.apply(record);
                    }
                }
                Some(Err(err)) => {
                    self.apply(DeltaRecord::TerminateError(err.into()));
                }
                None => {
                    let tail = lines.finish();
                    for record in parser.parse_chunk(&tail) {
                        self.apply(record);
                    }
                    if !parser.is_finished() {
                        self.apply(DeltaRecord::TerminateError(StreamFailure::protocol(
                            "stream closed without terminator",
                        )));
                    }
                }
            }
        }
        drop(bytes);
        if parser.skipped() > 0 {
            debug!(session_id = %self.id, skipped = parser.skipped(), "malformed lines skipped");
        }
        self.closed_outcome()
    }

    /// Applies one record. Returns false when the session no longer accepts
    /// records (not yet open, or already closed).
    pub fn apply(&mut self, record: DeltaRecord) -> bool {
        let Some(pending_id) = self.pending_id else {
            return false;
        };
        if !matches!(self.state, SessionState::Open | SessionState::Streaming) {
            return false;
        }
        match record {
            DeltaRecord::Delta(delta) => {
                self.state = SessionState::Streaming;
                let seq = self.accumulator.push(&delta);
                debug!(session_id = %self.id, message_id = %pending_id, seq, len = delta.content.len(), "delta applied");
                if !delta.content.is_empty() {
                    self.store.update_by_id(pending_id, |edit| {
                        edit.append_text(&delta.content);
                    });
                }
            }
            DeltaRecord::TerminateNormal => self.finish(None),
            DeltaRecord::TerminateError(failure) => self.finish(Some(failure)),
        }
        true
    }

    /// Closes the session immediately as cancelled.
    pub fn cancel(&mut self) {
        match self.state {
            SessionState::Idle | SessionState::BuildingRequest => {
                self.request = None;
                self.failure = Some(StreamFailure::Cancelled);
                self.state = SessionState::Closed;
            }
            SessionState::Open | SessionState::Streaming => {
                self.finish(Some(StreamFailure::Cancelled));
            }
            SessionState::Finalizing | SessionState::Closed => {}
        }
    }

    /// Outcome of a closed session that opened a stream.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        if self.state != SessionState::Closed {
            return None;
        }
        let message_id = self.pending_id?;
        Some(SessionOutcome {
            session_id: self.id,
            message_id,
            text: self.accumulator.text().to_string(),
            finish_reason: self.accumulator.finish_reason().map(ToOwned::to_owned),
            deltas: self.accumulator.applied(),
            status: match &self.failure {
                None => SessionStatus::Completed,
                Some(failure) => SessionStatus::Failed(failure.clone()),
            },
        })
    }

    fn closed_outcome(&self) -> Result<SessionOutcome, ChatError> {
        self.outcome()
            .ok_or_else(|| ChatError::invariant("session ended without an outcome"))
    }

    fn finish(&mut self, failure: Option<StreamFailure>) {
        if matches!(self.state, SessionState::Finalizing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Finalizing;
        if let Some(id) = self.pending_id {
            self.store.update_by_id(id, |edit| {
                edit.finalize();
            });
            if let Some(failure) = &failure {
                self.store.report_failure(id, failure.clone());
            }
        }
        match &failure {
            None => info!(
                session_id = %self.id,
                deltas = self.accumulator.applied(),
                "session completed"
            ),
            Some(failure) => warn!(
                session_id = %self.id,
                deltas = self.accumulator.applied(),
                error = %failure,
                "session failed"
            ),
        }
        self.failure = failure;
        self.state = SessionState::Closed;
    }

    fn expect_state(&self, expected: SessionState, operation: &str) -> Result<(), ChatError> {
        if self.state == expected {
            return Ok(());
        }
        Err(ChatError::SessionClosed(format!(
            "{operation} requires {expected:?}, session is {:?}",
            self.state
        )))
    }
}

impl Drop for StreamingSession<'_> {
    fn drop(&mut self) {
        if matches!(self.state, SessionState::Open | SessionState::Streaming) {
            warn!(session_id = %self.id, "session dropped while streaming");
            self.finish(Some(StreamFailure::Cancelled));
        }
    }
}

/// Resolves once an abort is requested.
async fn wait_for_abort(rx: &mut watch::Receiver<bool>) {
    let aborted = rx.wait_for(|aborted| *aborted).await.is_ok();
    if !aborted {
        std::future::pending::<()>().await;
    }
}
