/// Errors returned by a completion transport before they are normalized into a
/// terminal stream failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint answered with a non-success status before streaming began.
    #[error("completion request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// The request could not be sent (connection refused, DNS, TLS, timeout).
    #[error("completion request failed: {0}")]
    Connect(String),
    /// Reading the response body failed mid-stream.
    #[error("stream read failed: {0}")]
    Read(String),
}

impl TransportError {
    /// Creates a connect-level error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }

    /// Creates a read-level error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read(message.into())
    }
}

/// Terminal reason carried by `terminate-error` and the failure notification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum StreamFailure {
    /// Connection refused, dropped, or unreadable.
    #[error("transport failure: {message}")]
    Transport { message: String },
    /// Non-success response status before streaming started.
    #[error("status failure ({status}): {message}")]
    Status { status: u16, message: String },
    /// The stream carried an explicit error event.
    #[error("provider failure: {message}")]
    Provider { message: String },
    /// The stream ended without the terminator token.
    #[error("protocol failure: {message}")]
    Protocol { message: String },
    /// The session was cancelled by the caller.
    #[error("session cancelled")]
    Cancelled,
}

impl StreamFailure {
    pub(crate) fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

impl From<&TransportError> for StreamFailure {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Status { status, body } => StreamFailure::Status {
                status: *status,
                message: body.clone(),
            },
            TransportError::Connect(message) | TransportError::Read(message) => {
                StreamFailure::Transport {
                    message: message.clone(),
                }
            }
        }
    }
}

impl From<TransportError> for StreamFailure {
    fn from(err: TransportError) -> Self {
        StreamFailure::from(&err)
    }
}

/// Top-level error type for the public chat API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid user input.
    #[error("validation error: {0}")]
    Validation(String),
    /// A transcript invariant would be broken. Indicates a caller bug.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// The session is not in a state that accepts the requested operation.
    #[error("session closed: {0}")]
    SessionClosed(String),
    /// The conversation task is no longer running.
    #[error("conversation closed")]
    ConversationClosed,
}

impl ChatError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }
}
