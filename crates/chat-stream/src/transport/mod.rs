//! Network boundary: outgoing request body and the stream-opening contract.
//!
//! The session only depends on [`CompletionTransport`], so the HTTP client can
//! be swapped for a proxy or a scripted stream in tests.
mod http;

use std::pin::Pin;

pub use http::HttpTransport;

use crate::errors::TransportError;
use crate::history::ChatTurn;

/// Raw response body chunks. Chunk boundaries carry no meaning.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// JSON body of one streaming completion request.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatTurn>,
    pub stream: bool,
}

impl CompletionRequest {
    /// Builds a streaming request.
    pub fn streaming(model: impl Into<String>, messages: Vec<ChatTurn>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
        }
    }
}

/// Opens one completion stream per call.
#[async_trait::async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Sends the request and returns the response body once a success status
    /// has been received.
    async fn open_stream(&self, request: CompletionRequest) -> Result<ByteStream, TransportError>;
}
