//! Trait abstractions for runtime I/O
//!
//! These traits let the engine run against a console, an HTTP buffer or
//! test doubles, and let deployments plug in their own evaluators and value
//! formatters.

use super::evaluator::EvalError;
use super::services::Services;
use crate::llm::LlmError;
use crate::memory::DataRecord;
use crate::spec::{DataProperty, Execute};
use crate::state_machine::{Action, Event};
use async_trait::async_trait;
use serde_json::Value;

/// Where the chatbot's messages go
pub trait Channel: Send {
    /// `who` is the name of the module that produced the message
    fn output(&mut self, message: &str, who: &str);

    /// An LLM call is about to start
    fn thinking(&mut self) {}

    fn stop_thinking(&mut self) {}
}

/// Where user messages come from; `None` ends the conversation
#[async_trait]
pub trait InputSource: Send {
    async fn next_input(&mut self) -> Option<String>;
}

/// Observer notified after each executed action
pub trait ActionListener: Send {
    fn on_action(&mut self, action: &Action, event: Option<&Event>);
}

/// Runs the `execute` part of an effect descriptor
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, execute: &Execute, data: &DataRecord) -> Result<String, EvalError>;
}

/// Normalizes a raw value for a property type.
///
/// `Ok(None)` means the value was not understood. Errors are reserved for
/// LLM failures in formatters that consult the model.
#[async_trait]
pub trait ValueFormatter: Send + Sync {
    async fn format(
        &self,
        raw: &str,
        property: &DataProperty,
        services: &Services,
        module: &str,
    ) -> Result<Option<Value>, LlmError>;
}
