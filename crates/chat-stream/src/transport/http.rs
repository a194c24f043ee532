use futures::StreamExt as _;
use tracing::debug;

use super::{ByteStream, CompletionRequest, CompletionTransport};
use crate::config::ChatConfig;
use crate::errors::{ChatError, TransportError};

/// Streams chat completions over HTTPS with reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpTransport {
    /// Creates a transport from explicit configuration.
    pub fn new(config: &ChatConfig) -> Result<Self, ChatError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: config.completions_url(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait::async_trait]
impl CompletionTransport for HttpTransport {
    async fn open_stream(&self, request: CompletionRequest) -> Result<ByteStream, TransportError> {
        debug!(url = %self.url, model = %request.model, turns = request.messages.len(), "opening completion stream");
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::read(e.to_string())));
        Ok(Box::pin(stream))
    }
}
