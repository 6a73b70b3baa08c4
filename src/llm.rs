//! LLM provider abstraction
//!
//! The engine only needs plain text completion over role-tagged turns with
//! stop sequences; providers implement [`LlmService`].

mod error;
mod openai;
mod registry;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use openai::OpenAIService;
pub use registry::{LlmConfig, ModelRegistry};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Text completion provider
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    fn model_id(&self) -> &str;
}

/// Provider wrapper that logs each completion with its model, prompt size,
/// latency and outcome
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let prompt_chars: usize = request.turns.iter().map(|t| t.text.len()).sum();
        tracing::debug!(
            model = %self.model_id,
            turns = request.turns.len(),
            prompt_chars,
            stop = ?request.stop,
            "Sending completion request"
        );

        let started = Instant::now();
        let result = self.inner.complete(request).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    elapsed_ms = %elapsed_ms,
                    completion_chars = response.text.len(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "Completion received"
                );
                tracing::debug!(model = %self.model_id, completion = %response.text, "Completion text");
            }
            Err(e) => {
                tracing::warn!(
                    model = %self.model_id,
                    elapsed_ms = %elapsed_ms,
                    kind = %e.kind,
                    retryable = e.is_retryable(),
                    error = %e.message,
                    "Completion failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::MockLlmService;

    #[tokio::test]
    async fn test_logging_service_passes_through() {
        let mock = Arc::new(MockLlmService::new("gpt-test"));
        mock.queue_text("AI: hello");
        mock.queue_error(LlmError::rate_limit("429"));
        let service = LoggingService::new(mock.clone());
        let request = LlmRequest::new(vec![PromptTurn::human("hi")]).with_stop("\nHuman:");

        assert_eq!(service.model_id(), "gpt-test");
        assert_eq!(service.complete(&request).await.unwrap().text, "AI: hello");
        let err = service.complete(&request).await.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::RateLimit);
        assert_eq!(mock.recorded_requests(), vec![request.clone(), request]);
    }
}
