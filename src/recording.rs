//! Recorded conversations
//!
//! A recording is the ordered interaction log (`{"user": ...}` and
//! `{"chatbot": [...]}` entries), a trace of executed actions and the
//! response time of each turn. Recordings are dumped as JSON and diffed
//! against each other for regression checks.

use crate::compiler::CompiledChatbot;
use crate::runtime::{ActionListener, Channel};
use crate::state_machine::{describe_action, Action, Event};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid recording: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interaction {
    User(String),
    /// Everything the chatbot said between two user messages
    Chatbot(Vec<String>),
}

/// One executed action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedInteraction {
    pub interactions: Vec<Interaction>,
    #[serde(default)]
    pub trace: Vec<TraceRecord>,
    /// Milliseconds per user turn
    #[serde(default)]
    pub response_times_ms: Vec<u64>,
}

impl RecordedInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&mut self, text: &str) {
        self.interactions.push(Interaction::User(text.to_string()));
    }

    /// Append to the current chatbot entry, opening one if the user spoke last
    pub fn chatbot(&mut self, text: &str) {
        if let Some(Interaction::Chatbot(messages)) = self.interactions.last_mut() {
            messages.push(text.to_string());
        } else {
            self.interactions
                .push(Interaction::Chatbot(vec![text.to_string()]));
        }
    }

    pub fn trace(&mut self, record: TraceRecord) {
        self.trace.push(record);
    }

    pub fn response_time(&mut self, elapsed: Duration) {
        self.response_times_ms
            .push(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
    }

    pub fn average_response_time(&self) -> Option<Duration> {
        let turns = u64::try_from(self.response_times_ms.len()).ok().filter(|n| *n > 0)?;
        let total: u64 = self.response_times_ms.iter().sum();
        Some(Duration::from_millis(total / turns))
    }

    /// Interaction log as text, one line per message
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for interaction in &self.interactions {
            match interaction {
                Interaction::User(text) => {
                    let _ = writeln!(out, "user: {text}");
                }
                Interaction::Chatbot(messages) => {
                    for text in messages {
                        let _ = writeln!(out, "chatbot: {text}");
                    }
                }
            }
        }
        out
    }

    pub fn to_json(&self) -> Result<String, RecordingError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn dump(&self, path: &Path) -> Result<(), RecordingError> {
        std::fs::write(path, self.to_json()?).map_err(|source| RecordingError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, RecordingError> {
        let text = std::fs::read_to_string(path).map_err(|source| RecordingError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Unified diff of two transcripts; `None` when they match
pub fn diff(expected: &RecordedInteraction, actual: &RecordedInteraction) -> Option<String> {
    let (expected, actual) = (expected.transcript(), actual.transcript());
    if expected == actual {
        return None;
    }
    Some(
        similar::TextDiff::from_lines(&expected, &actual)
            .unified_diff()
            .header("expected", "actual")
            .to_string(),
    )
}

/// Recording shared between an engine and its channel and listeners
pub type SharedRecording = Arc<Mutex<RecordedInteraction>>;

pub(crate) fn with_recording<T>(
    recording: &SharedRecording,
    f: impl FnOnce(&mut RecordedInteraction) -> T,
) -> T {
    f(&mut recording.lock().unwrap_or_else(PoisonError::into_inner))
}

/// Channel wrapper that records what the chatbot says
pub struct RecordingChannel {
    inner: Box<dyn Channel>,
    recording: SharedRecording,
}

impl RecordingChannel {
    pub fn new(inner: Box<dyn Channel>, recording: SharedRecording) -> Self {
        Self { inner, recording }
    }
}

impl Channel for RecordingChannel {
    fn output(&mut self, message: &str, who: &str) {
        with_recording(&self.recording, |r| r.chatbot(message));
        self.inner.output(message, who);
    }

    fn thinking(&mut self) {
        self.inner.thinking();
    }

    fn stop_thinking(&mut self) {
        self.inner.stop_thinking();
    }
}

/// Listener adding every executed action to the trace
pub struct TraceListener {
    chatbot: Arc<CompiledChatbot>,
    recording: SharedRecording,
}

impl TraceListener {
    pub fn new(chatbot: Arc<CompiledChatbot>, recording: SharedRecording) -> Self {
        Self { chatbot, recording }
    }
}

impl ActionListener for TraceListener {
    fn on_action(&mut self, action: &Action, event: Option<&Event>) {
        let record = TraceRecord {
            action: describe_action(action, self.chatbot.modules()),
            event: event.map(|e| e.kind().to_string()),
        };
        with_recording(&self.recording, |r| r.trace(record));
    }
}
