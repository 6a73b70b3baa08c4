//! API request and response types

use crate::engine::TurnOutcome;
use crate::runtime::ChatbotOutput;
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Response for a new conversation: its id and the opening messages
#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    pub id: String,
    pub outputs: Vec<ChatbotOutput>,
}

/// Everything the chatbot said during one turn
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub outputs: Vec<ChatbotOutput>,
    pub outcome: OutcomeInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// How the turn ended
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeInfo {
    Quiescent,
    Unhandled { event: String },
    LlmUnavailable { message: String },
}

impl From<&TurnOutcome> for OutcomeInfo {
    fn from(outcome: &TurnOutcome) -> Self {
        match outcome {
            TurnOutcome::Quiescent => OutcomeInfo::Quiescent,
            TurnOutcome::Unhandled { event } => OutcomeInfo::Unhandled {
                event: event.kind().to_string(),
            },
            TurnOutcome::LlmUnavailable { message } => OutcomeInfo::LlmUnavailable {
                message: message.clone(),
            },
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
