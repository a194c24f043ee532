use std::time::Duration;

use crate::errors::ChatError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Configuration injected into every streaming session.
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// API key used for bearer auth.
    pub api_key: String,
    /// Base URL for the OpenAI-compatible endpoint.
    ///
    /// Useful for proxies or local test servers.
    pub base_url: String,
    /// Target model identifier.
    pub model: String,
    /// Fixed system instruction sent ahead of the history.
    pub system_prompt: String,
    /// HTTP timeout for one completion request, streaming included.
    pub timeout: Duration,
}

impl ChatConfig {
    /// Creates a config with defaults and a provided API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Builds a config from `OPENAI_API_KEY`, with optional `OPENAI_BASE_URL`,
    /// `CHAT_MODEL` and `CHAT_SYSTEM_PROMPT` overrides.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ChatError> {
        let api_key = lookup("OPENAI_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(ChatError::Config("missing OPENAI_API_KEY".into()));
        }
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::new(api_key);
        if let Some(base_url) = non_blank("OPENAI_BASE_URL") {
            config = config.base_url(base_url);
        }
        if let Some(model) = non_blank("CHAT_MODEL") {
            config = config.model(model);
        }
        if let Some(prompt) = non_blank("CHAT_SYSTEM_PROMPT") {
            config = config.system_prompt(prompt);
        }
        Ok(config)
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn validate(&self) -> Result<(), ChatError> {
        if self.api_key.trim().is_empty() {
            return Err(ChatError::Config("api_key must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ChatError::Config("model must not be empty".into()));
        }
        Ok(())
    }
}
