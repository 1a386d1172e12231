use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod http;
pub mod parse;
pub mod test_support;

pub use http::HttpLlmGateway;
pub use parse::extract_json;

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("rate limited")]
    RateLimited,

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("upstream 5xx: {0}")]
    Upstream5xx(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Transient errors are worth another attempt; invalid requests and
    /// malformed responses are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited | LlmError::Timeout(_) | LlmError::Upstream5xx(_)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// The arena's only LLM seam: one chat call against an opaque model id.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn chat(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, LlmError>;
}

/// Retry a chat call with exponential backoff for transient failures.
/// `attempts` counts the total tries, not just the retries.
pub async fn chat_with_retry(
    gateway: &dyn LlmGateway,
    model_id: &str,
    messages: &[ChatMessage],
    options: &ChatOptions,
    attempts: u32,
) -> Result<ChatResponse, LlmError> {
    let mut delay = Duration::from_secs(1);
    let mut last_error = LlmError::InvalidRequest("no attempts configured".into());

    for attempt in 0..attempts.max(1) {
        match gateway.chat(model_id, messages, options).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                tracing::warn!(model_id, attempt, error = %e, "llm call failed, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
                last_error = e;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedGateway;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_errors() {
        let gateway = ScriptedGateway::new(vec![
            Err(LlmError::RateLimited),
            Err(LlmError::Upstream5xx("502".into())),
            Ok("ok".to_string()),
        ]);
        let result = chat_with_retry(
            &gateway,
            "test-model",
            &[ChatMessage::user("hi")],
            &ChatOptions::default(),
            3,
        )
        .await
        .unwrap();
        assert_eq!(result.content, "ok");
        assert_eq!(gateway.calls(), 3);
    }

    #[tokio::test]
    async fn invalid_request_is_not_retried() {
        let gateway = ScriptedGateway::new(vec![
            Err(LlmError::InvalidRequest("bad model".into())),
            Ok("never".to_string()),
        ]);
        let result = chat_with_retry(
            &gateway,
            "test-model",
            &[ChatMessage::user("hi")],
            &ChatOptions::default(),
            3,
        )
        .await;
        assert!(matches!(result, Err(LlmError::InvalidRequest(_))));
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_surfaces_last_error() {
        let gateway = ScriptedGateway::new(vec![
            Err(LlmError::RateLimited),
            Err(LlmError::RateLimited),
            Err(LlmError::RateLimited),
        ]);
        let result = chat_with_retry(
            &gateway,
            "test-model",
            &[ChatMessage::user("hi")],
            &ChatOptions::default(),
            3,
        )
        .await;
        assert!(matches!(result, Err(LlmError::RateLimited)));
        assert_eq!(gateway.calls(), 3);
    }
}
