//! Scripted transport shared by unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::{StreamExt as _, stream};

use crate::config::ChatConfig;
use crate::errors::TransportError;
use crate::transport::{ByteStream, CompletionRequest, CompletionTransport};

/// What one `open_stream` call replays.
pub(crate) enum Script {
    /// Yields the items, then ends the body.
    Chunks(Vec<Result<Bytes, TransportError>>),
    /// Yields the chunks, then never yields again.
    ChunksThenHang(Vec<Bytes>),
    /// Fails before streaming starts.
    Refuse(TransportError),
}

pub(crate) struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Requests received so far, in order.
    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait::async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn open_stream(&self, request: CompletionRequest) -> Result<ByteStream, TransportError> {
        self.requests.lock().expect("requests lock").push(request);
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or(Script::Chunks(Vec::new()));
        match script {
            Script::Chunks(items) => Ok(Box::pin(stream::iter(items))),
            Script::ChunksThenHang(chunks) => Ok(Box::pin(
                stream::iter(chunks.into_iter().map(Ok))
                    .chain(stream::pending::<Result<Bytes, TransportError>>()),
            )),
            Script::Refuse(err) => Err(err),
        }
    }
}

/// One SSE data line carrying a content fragment.
pub(crate) fn delta_line(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}}]})
    )
}

pub(crate) fn done_line() -> &'static str {
    "data: [DONE]\n\n"
}

pub(crate) fn test_config() -> ChatConfig {
    ChatConfig::new("test-key")
        .model("test-model")
        .system_prompt("SYS")
}
