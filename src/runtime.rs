//! Runtime for executing conversations
//!
//! Compiled modules, the per-conversation execution state, prompt assembly
//! and output parsing, and the services (LLM, effect evaluation, value
//! formatting) that modules call into.

mod channel;
mod error;
mod evaluator;
mod execution;
mod formatters;
mod gathering;
mod module;
mod parser;
mod prompt;
mod services;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use channel::{BufferedChannel, ChatbotOutput, ConsoleChannel, ConsoleInput};
pub use error::EngineError;
pub use evaluator::{plain_text, EvalError, ProcessEvaluator};
pub use execution::ExecutionState;
pub use formatters::{DateFormatter, EnumFormatter, FormatterRegistry, TimeFormatter, NO_MATCH};
pub use gathering::{describe, render_template};
pub use module::{get_question, ModuleArena, ModuleId, ModulePrompts, RuntimeModule};
pub use parser::{parse_output, ParsedOutput, AI_PREFIX};
pub use prompt::{PromptContext, PromptLayout, Section, STOP_SEQUENCE};
pub use services::Services;
pub use traits::*;
