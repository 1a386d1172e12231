//! Scripted gateway shared by the test suites of the research crates.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{ChatMessage, ChatOptions, ChatResponse, LlmError, LlmGateway};

/// Replays a fixed sequence of responses; repeats the last entry once the
/// script runs out. Records every prompt for assertions.
pub struct ScriptedGateway {
    script: Vec<Result<String, LlmError>>,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script,
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Gateway that always answers with the same content.
    pub fn always(content: &str) -> Self {
        Self::new(vec![Ok(content.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn chat(
        &self,
        _model_id: &str,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        let index = self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }

        let entry = self
            .script
            .get(index)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or_else(|| Err(LlmError::InvalidRequest("empty script".into())));

        entry.map(|content| ChatResponse {
            content,
            prompt_tokens: 100,
            completion_tokens: 50,
        })
    }
}
