use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ChatConfig;
use crate::errors::ChatError;
use crate::session::{SessionOutcome, StreamingSession};
use crate::transcript::{TranscriptEvent, TranscriptSnapshot, TranscriptStore};
use crate::transport::{CompletionTransport, HttpTransport};

/// One conversation screen: the transcript plus what is needed to start
/// sessions against it.
pub struct Conversation {
    config: Arc<ChatConfig>,
    transport: Arc<dyn CompletionTransport>,
    store: TranscriptStore,
}

impl Conversation {
    pub fn new(config: ChatConfig, transport: Arc<dyn CompletionTransport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            store: TranscriptStore::new(),
        }
    }

    /// Creates a conversation backed by [`HttpTransport`].
    pub fn connect(config: ChatConfig) -> Result<Self, ChatError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        self.store.snapshot()
    }

    /// Registers a transcript observer.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TranscriptEvent> {
        self.store.subscribe()
    }

    /// Appends the user turn and returns a session ready to `run`.
    pub fn submit(&mut self, text: impl Into<String>) -> Result<StreamingSession<'_>, ChatError> {
        let mut session =
            StreamingSession::new(self.config.clone(), self.transport.clone(), &mut self.store);
        session.submit(text)?;
        Ok(session)
    }

    /// Submits a turn and streams it to completion.
    pub async fn send(&mut self, text: impl Into<String>) -> Result<SessionOutcome, ChatError> {
        let mut session = self.submit(text)?;
        session.run().await
    }

    /// Moves the conversation onto its own task.
    ///
    /// Subscribe before spawning; the transcript is owned by the task.
    pub fn spawn(self) -> ConversationHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(conversation_task(self, rx));
        ConversationHandle { commands: tx, task }
    }
}

enum Command {
    Submit(String),
    Cancel,
    Shutdown,
}

/// Handle to a spawned [`Conversation`].
///
/// Turns run one at a time in submission order. Dropping the handle cancels
/// the active session and stops the task.
pub struct ConversationHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: tokio::task::JoinHandle<Conversation>,
}

impl ConversationHandle {
    /// Queues a user turn.
    pub fn submit(&self, text: impl Into<String>) -> Result<(), ChatError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ChatError::Validation("user text must not be empty".into()));
        }
        self.send(Command::Submit(text))
    }

    /// Cancels the active session, if any. Queued turns still run.
    pub fn cancel(&self) -> Result<(), ChatError> {
        self.send(Command::Cancel)
    }

    /// Waits for the active and queued turns, then returns the conversation.
    pub async fn shutdown(self) -> Result<Conversation, ChatError> {
        let Self { commands, task } = self;
        commands
            .send(Command::Shutdown)
            .map_err(|_| ChatError::ConversationClosed)?;
        let conversation = task.await.map_err(|_| ChatError::ConversationClosed)?;
        drop(commands);
        Ok(conversation)
    }

    fn send(&self, command: Command) -> Result<(), ChatError> {
        self.commands
            .send(command)
            .map_err(|_| ChatError::ConversationClosed)
    }
}

async fn conversation_task(
    mut conversation: Conversation,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> Conversation {
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut closing = false;
    loop {
        let text = match queue.pop_front() {
            Some(text) => text,
            None if closing => break,
            None => match commands.recv().await {
                Some(Command::Submit(text)) => text,
                Some(Command::Cancel) => continue,
                Some(Command::Shutdown) | None => break,
            },
        };

        let mut session = match conversation.submit(text) {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "turn rejected");
                continue;
            }
        };
        let session_id = session.id();
        let abort = session.abort_handle();
        let run = session.run();
        tokio::pin!(run);

        let mut detached = false;
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                command = commands.recv(), if !detached => match command {
                    Some(Command::Submit(text)) => queue.push_back(text),
                    Some(Command::Cancel) => abort.abort(),
                    Some(Command::Shutdown) => closing = true,
                    None => {
                        debug!(%session_id, "handle dropped, cancelling active session");
                        detached = true;
                        queue.clear();
                        abort.abort();
                    }
                },
            }
        };

        match result {
            Ok(outcome) => info!(
                %session_id,
                completed = outcome.is_completed(),
                chars = outcome.text.chars().count(),
                queued = queue.len(),
                "turn finished"
            ),
            Err(err) => error!(%session_id, error = %err, "turn aborted"),
        }
        if detached {
            break;
        }
    }
    conversation
}
