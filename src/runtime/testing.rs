//! Mock implementations for testing
//!
//! These mocks let the engine run whole conversations without network or
//! terminal I/O.

use super::traits::{Channel, InputSource};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Mock LLM Service
// ============================================================================

/// LLM service that returns queued responses in order. Routed replies
/// answer any request whose prompt contains their keyword, ahead of the queue.
pub struct MockLlmService {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    routes: Mutex<Vec<(String, String)>>,
    model_id: String,
    delay: Option<Duration>,
    /// Record of all requests made
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            routes: Mutex::new(Vec::new()),
            model_id: model_id.into(),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue_text(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(LlmResponse::text(text)));
    }

    pub fn route(&self, keyword: impl Into<String>, reply: impl Into<String>) {
        self.routes
            .lock()
            .unwrap()
            .push((keyword.into(), reply.into()));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let prompt = format!("{}\n{}", request.system_text(), request.human_text());
        let routed = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .find(|(keyword, _)| prompt.contains(keyword.as_str()))
            .map(|(_, reply)| reply.clone());
        if let Some(reply) = routed {
            return Ok(LlmResponse::text(reply));
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::invalid_request("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Capturing channel
// ============================================================================

/// Channel that records `(who, message)` pairs; clones share the log
#[derive(Clone, Default)]
pub struct CapturingChannel {
    log: Arc<Mutex<Vec<(String, String)>>>,
}

impl CapturingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.log().into_iter().map(|(_, text)| text).collect()
    }
}

impl Channel for CapturingChannel {
    fn output(&mut self, message: &str, who: &str) {
        self.log
            .lock()
            .unwrap()
            .push((who.to_string(), message.to_string()));
    }
}

// ============================================================================
// Scripted input
// ============================================================================

/// Input source that replays fixed lines, then ends the conversation
pub struct ScriptedInput {
    lines: VecDeque<String>,
}

impl ScriptedInput {
    pub fn new(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
        }
    }
}

#[async_trait]
impl InputSource for ScriptedInput {
    async fn next_input(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}
