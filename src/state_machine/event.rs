//! Events that drive the state machine

use crate::memory::{DataRecord, MemoryPiece, ScopeId};
use crate::runtime::ModuleId;
use std::collections::BTreeMap;
use std::fmt;

/// Memory a module hands to whoever handles its event, per bucket
pub type MemoryDelta = BTreeMap<ScopeId, MemoryPiece>;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The user said something
    UserInput { text: String },

    /// An LLM chose a tool, or a sequence is entering a step
    ActivateModule {
        target: ModuleId,
        input: Option<String>,
        /// The exchange that led to the activation
        previous_answer: MemoryPiece,
    },

    /// An LLM produced a reply for the user
    AiResponse { text: String },

    /// A module needs more from the user before it can finish
    TaskInProgress { memory: MemoryDelta },

    /// A module completed
    TaskFinish {
        result: Option<String>,
        memory: MemoryDelta,
        data: Option<DataRecord>,
    },

    /// The LLM could not be reached within the retry budget
    LlmUnavailable { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UserInput,
    ActivateModule,
    AiResponse,
    TaskInProgress,
    TaskFinish,
    LlmUnavailable,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::UserInput => "UserInput",
            EventKind::ActivateModule => "ActivateModule",
            EventKind::AiResponse => "AIResponse",
            EventKind::TaskInProgress => "TaskInProgress",
            EventKind::TaskFinish => "TaskFinish",
            EventKind::LlmUnavailable => "LlmUnavailable",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    pub fn user_input(text: impl Into<String>) -> Self {
        Event::UserInput { text: text.into() }
    }

    pub fn finish(result: Option<String>) -> Self {
        Event::TaskFinish {
            result,
            memory: MemoryDelta::new(),
            data: None,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::UserInput { .. } => EventKind::UserInput,
            Event::ActivateModule { .. } => EventKind::ActivateModule,
            Event::AiResponse { .. } => EventKind::AiResponse,
            Event::TaskInProgress { .. } => EventKind::TaskInProgress,
            Event::TaskFinish { .. } => EventKind::TaskFinish,
            Event::LlmUnavailable { .. } => EventKind::LlmUnavailable,
        }
    }

    /// Text an output action says when asked to echo this event
    pub fn message(&self) -> Option<&str> {
        match self {
            Event::UserInput { text } | Event::AiResponse { text } => Some(text),
            Event::TaskFinish { result, .. } => result.as_deref(),
            Event::LlmUnavailable { message } => Some(message),
            Event::ActivateModule { .. } | Event::TaskInProgress { .. } => None,
        }
    }

    pub fn memory(&self) -> Option<&MemoryDelta> {
        match self {
            Event::TaskInProgress { memory } | Event::TaskFinish { memory, .. } => Some(memory),
            _ => None,
        }
    }
}
