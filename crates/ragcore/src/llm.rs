//! LLM service interface.
//!
//! LLM invocation is explicitly out of scope for the core — it is consumed
//! through this single-method interface. Concrete providers (local model
//! runtimes, hosted APIs) live outside this crate and are supplied by the
//! caller; the core never knows which provider it is talking to.

use async_trait::async_trait;

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

/// `complete(system_prompt, messages) -> string`. May return an empty
/// string on failure; the calling graph node decides the fallback.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, messages: &[ChatMessage]) -> String;
}

/// Deterministic stub used by tests. Returns a fixed response regardless
/// of input, or simulates a slow/failing provider when configured to.
#[cfg(any(test, feature = "test-support"))]
pub struct StubLlmClient {
    pub response: String,
    pub delay: std::time::Duration,
    pub fail: bool,
}

#[cfg(any(test, feature = "test-support"))]
impl StubLlmClient {
    pub fn responding(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            delay: std::time::Duration::ZERO,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            response: String::new(),
            delay: std::time::Duration::ZERO,
            fail: true,
        }
    }

    pub fn slow(response: impl Into<String>, delay: std::time::Duration) -> Self {
        Self {
            response: response.into(),
            delay,
            fail: false,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl LlmClient for StubLlmClient {
    async fn complete(&self, _system_prompt: &str, _messages: &[ChatMessage]) -> String {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return String::new();
        }
        self.response.clone()
    }
}
