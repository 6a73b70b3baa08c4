//! Collaborators shared by every conversation of a compiled chatbot

use super::evaluator::ProcessEvaluator;
use super::formatters::FormatterRegistry;
use super::traits::{Evaluator, ValueFormatter};
use crate::config::Configuration;
use crate::llm::{LlmError, LlmRequest, ModelRegistry, PromptTurn};
use crate::spec::PropertyType;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// LLM access, effect evaluation and value formatting
pub struct Services {
    llm: Arc<ModelRegistry>,
    evaluator: Arc<dyn Evaluator>,
    formatters: FormatterRegistry,
    llm_timeout: Duration,
    llm_max_attempts: u32,
    retry_base_delay: Duration,
    unavailable_message: String,
}

impl Services {
    pub fn new(llm: Arc<ModelRegistry>, configuration: &Configuration) -> Self {
        Self {
            llm,
            evaluator: Arc::new(ProcessEvaluator::new(configuration.load_path.clone())),
            formatters: FormatterRegistry::with_defaults(),
            llm_timeout: configuration.llm_timeout(),
            llm_max_attempts: configuration.llm_max_attempts.max(1),
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            unavailable_message: configuration.unavailable_message.clone(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_formatter(
        mut self,
        property_type: PropertyType,
        formatter: Arc<dyn ValueFormatter>,
    ) -> Self {
        self.formatters.register(property_type, formatter);
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    pub fn evaluator(&self) -> &dyn Evaluator {
        self.evaluator.as_ref()
    }

    pub fn formatter(&self, property_type: PropertyType) -> Option<Arc<dyn ValueFormatter>> {
        self.formatters.get(property_type)
    }

    pub fn unavailable_message(&self) -> &str {
        &self.unavailable_message
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.llm
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        // Exponential backoff: base, 2x base, 4x base...
        self.retry_base_delay * (1u32 << (attempt - 1).min(16))
    }

    /// Call the module's LLM with a per-call deadline, retrying retryable
    /// failures. Returns the completion text.
    pub async fn invoke(&self, module: &str, request: &LlmRequest) -> Result<String, LlmError> {
        let service = self.llm.for_module(module).ok_or_else(|| {
            LlmError::auth(format!("no LLM configured for module '{module}'"))
        })?;

        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.llm_timeout, service.complete(request)).await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::timeout(format!(
                    "no completion within {}s",
                    self.llm_timeout.as_secs_f32()
                ))),
            };

            match result {
                Ok(response) => return Ok(response.text),
                Err(e) if e.is_retryable() && attempt < self.llm_max_attempts => {
                    let delay = e.retry_after.unwrap_or_else(|| self.retry_delay(attempt));
                    tracing::warn!(
                        module = %module,
                        attempt,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Paraphrase `message` with the module's LLM
    pub async fn rephrase(
        &self,
        module: &str,
        message: &str,
        context: Option<&str>,
    ) -> Result<String, LlmError> {
        let mut prompt = format!("Please rephrase the following message:\n{message}");
        if let Some(context) = context {
            prompt = format!("Context: {context}\n{prompt}");
        }
        let request = LlmRequest::new(vec![PromptTurn::human(prompt)]);
        let text = self.invoke(module, &request).await?;
        Ok(text.trim().to_string())
    }
}
