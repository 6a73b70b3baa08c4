//! Common types for LLM interactions

use serde::{Deserialize, Serialize};

/// Text completion request made of role-tagged turns
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub turns: Vec<PromptTurn>,
    /// Generation stops before any of these sequences
    pub stop: Vec<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    pub fn new(turns: Vec<PromptTurn>) -> Self {
        Self {
            turns,
            stop: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }

    /// Text of the system turns, joined
    pub fn system_text(&self) -> String {
        self.text_of(TurnRole::System)
    }

    /// Text of the human turns, joined
    pub fn human_text(&self) -> String {
        self.text_of(TurnRole::Human)
    }

    fn text_of(&self, role: TurnRole) -> String {
        self.turns
            .iter()
            .filter(|t| t.role == role)
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    Human,
    Ai,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTurn {
    pub role: TurnRole,
    pub text: String,
}

impl PromptTurn {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            text: text.into(),
        }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Human,
            text: text.into(),
        }
    }
}

/// LLM response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Usage,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: Usage::default(),
        }
    }
}

/// Token usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
