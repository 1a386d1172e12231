use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::{ChatMessage, ChatOptions, ChatResponse, LlmError, LlmGateway};

/// OpenAI-compatible chat-completions gateway. Model ids pass through
/// verbatim, so one endpoint can front several vendor families.
pub struct HttpLlmGateway {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    default_timeout: Duration,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl HttpLlmGateway {
    pub fn new(base_url: String, api_key: String, default_timeout: Duration) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
            default_timeout,
        }
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn chat(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);

        let mut body = json!({
            "model": model_id,
            "messages": messages,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(timeout.as_secs())
            } else {
                LlmError::Upstream5xx(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if status.is_server_error() {
            return Err(LlmError::Upstream5xx(status.to_string()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::InvalidRequest(format!("{status}: {detail}")));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("empty completion".into()))?;

        let usage = completion.usage.unwrap_or_default();
        Ok(ChatResponse {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}
