use crate::message::{Message, Role};

/// Role tag used in outgoing request context.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<Role> for ChatRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        }
    }
}

/// One role/content pair of request context.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Projects transcript entries into request context, preserving order.
pub fn build_history(messages: &[Message]) -> Vec<ChatTurn> {
    messages
        .iter()
        .map(|m| ChatTurn::new(m.role().into(), m.text()))
        .collect()
}

/// System instruction followed by the projected history.
///
/// A blank system prompt is omitted.
pub fn request_messages(system_prompt: &str, messages: &[Message]) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(messages.len() + 1);
    let system_prompt = system_prompt.trim();
    if !system_prompt.is_empty() {
        turns.push(ChatTurn::new(ChatRole::System, system_prompt));
    }
    turns.extend(build_history(messages));
    turns
}
