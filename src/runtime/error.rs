//! Errors that abort a conversation turn

use super::evaluator::EvalError;
use crate::llm::LlmError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("module '{module}' has no tool named '{tool}'")]
    UnknownTool { module: String, tool: String },

    /// The LLM could not be reached within the deadline and retry budget
    #[error("LLM unavailable: {0}")]
    Llm(#[from] LlmError),

    #[error("effect evaluation failed: {0}")]
    Evaluator(#[from] EvalError),

    #[error("action '{module}' is missing data for '{property}'")]
    MissingActionData { module: String, property: String },

    #[error("conversation has not been started")]
    NotStarted,

    #[error("event cascade exceeded {0} steps")]
    CascadeLimit(usize),
}
