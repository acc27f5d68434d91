//! Chat-completion LLM contract (§6.5): used only by the optional
//! reclassify/reflect scheduler tasks. Like [`crate::embedding`], this is
//! an interface-only module — no HTTP client, no provider SDK.

use async_trait::async_trait;

/// A single chat message in the `chat(messages, model)` contract.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum LlmError {
    RequestFailed(String),
    InvalidInput(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::RequestFailed(e) => write!(f, "LLM request failed: {e}"),
            LlmError::InvalidInput(e) => write!(f, "invalid LLM input: {e}"),
        }
    }
}

impl std::error::Error for LlmError {}

/// `chat(messages, model) -> text` (§6.5).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], model: &str) -> Result<String, LlmError>;
}

/// No-op client: every call fails, exercising the "reclassify/reflect
/// skipped this tick" path without needing network I/O.
pub struct NullLlmClient;

#[async_trait]
impl LlmClient for NullLlmClient {
    async fn chat(&self, _messages: &[ChatMessage], _model: &str) -> Result<String, LlmError> {
        Err(LlmError::RequestFailed("no LLM client configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_client_always_fails() {
        let client = NullLlmClient;
        let messages = [ChatMessage { role: ChatRole::User, content: "hi".into() }];
        assert!(client.chat(&messages, "gpt").await.is_err());
    }
}
