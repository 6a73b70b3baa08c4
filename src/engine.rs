//! Per-conversation run loop
//!
//! An [`Engine`] owns one conversation's [`ExecutionState`] and drives the
//! shared compiled machine: each external input is pushed as an event and
//! the event stack is drained, most recent first, before the turn ends.

#[cfg(test)]
mod scenarios;

use crate::compiler::CompiledChatbot;
use crate::recording::{with_recording, RecordedInteraction, RecordingChannel, SharedRecording, TraceListener};
use crate::runtime::{ActionListener, Channel, EngineError, ExecutionState, InputSource, Services};
use crate::state_machine::{ActionContext, Event, Vertex, VertexId};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Transitions allowed in one turn before the cascade is abandoned
pub const CASCADE_LIMIT: usize = 256;

/// How a turn ended
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// No events left and nothing to do without new input
    Quiescent,
    /// `event` matched no transition; the rest of the cascade was dropped
    Unhandled { event: Event },
    /// The LLM could not be reached; the user was told so
    LlmUnavailable { message: String },
}

pub struct Engine {
    chatbot: Arc<CompiledChatbot>,
    services: Arc<Services>,
    state: ExecutionState,
    recording: SharedRecording,
    started: bool,
}

impl Engine {
    pub fn new(chatbot: Arc<CompiledChatbot>, services: Arc<Services>, channel: Box<dyn Channel>) -> Self {
        let recording: SharedRecording = Arc::new(Mutex::new(RecordedInteraction::new()));
        let channel = RecordingChannel::new(channel, Arc::clone(&recording));
        let mut state = ExecutionState::new(chatbot.machine().initial(), Box::new(channel));
        state.add_listener(Box::new(TraceListener::new(
            Arc::clone(&chatbot),
            Arc::clone(&recording),
        )));
        Self {
            chatbot,
            services,
            state,
            recording,
            started: false,
        }
    }

    pub fn add_action_listener(&mut self, listener: Box<dyn ActionListener>) {
        self.state.add_listener(listener);
    }

    pub fn chatbot(&self) -> &CompiledChatbot {
        &self.chatbot
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Name of the module the conversation is in
    pub fn current_module(&self) -> Option<&str> {
        self.chatbot
            .machine()
            .vertex(self.state.current())
            .module()
            .map(|module| self.chatbot.modules().name(module))
    }

    /// Snapshot of the recording so far
    pub fn recording(&self) -> RecordedInteraction {
        with_recording(&self.recording, |r| r.clone())
    }

    /// Leave the initial state, saying the greeting if there is one
    pub async fn start(&mut self) -> Result<TurnOutcome, EngineError> {
        self.started = true;
        tracing::info!(entry = %self.chatbot.entry_name(), "Conversation started");
        self.run().await
    }

    pub async fn execute_with_input(&mut self, text: &str) -> Result<TurnOutcome, EngineError> {
        if !self.started {
            return Err(EngineError::NotStarted);
        }
        let started_at = Instant::now();
        with_recording(&self.recording, |r| r.user(text));
        self.state.push_event(Event::user_input(text));

        let outcome = self.run().await;
        let elapsed = started_at.elapsed();
        with_recording(&self.recording, |r| r.response_time(elapsed));
        tracing::info!(
            module = ?self.current_module(),
            duration_ms = %elapsed.as_millis(),
            "Turn completed"
        );
        outcome
    }

    /// Start, then feed every input until the source ends
    pub async fn run_all(&mut self, input: &mut dyn InputSource) -> Result<(), EngineError> {
        self.start().await?;
        while let Some(text) = input.next_input().await {
            match self.execute_with_input(&text).await {
                Ok(_) => {}
                Err(e @ EngineError::NotStarted) => return Err(e),
                Err(e) => self.report_failure(&e),
            }
        }
        Ok(())
    }

    /// Tell the user a turn failed; the conversation goes on
    fn report_failure(&mut self, error: &EngineError) {
        tracing::warn!(error = %error, module = ?self.current_module(), "Turn abandoned");
        let who = self.current_module().unwrap_or("chatbot").to_string();
        self.state
            .output(&format!("Sorry, I could not complete that: {error}"), &who);
    }

    /// Put the conversation back where the failed turn began
    fn restore(&mut self, ctx: &ActionContext<'_>, resting: VertexId) {
        if matches!(ctx.machine.vertex(resting), Vertex::Initial) {
            return;
        }
        if resting != self.state.current() {
            tracing::debug!(
                from = %ctx.label(self.state.current()),
                to = %ctx.label(resting),
                "Restoring state after failed turn"
            );
        }
        self.state.set_current(resting);
    }

    /// Drain the event stack
    async fn run(&mut self) -> Result<TurnOutcome, EngineError> {
        let chatbot = Arc::clone(&self.chatbot);
        let services = Arc::clone(&self.services);
        let ctx = ActionContext {
            machine: chatbot.machine(),
            modules: chatbot.modules(),
            services: &services,
        };

        let resting = self.state.current();
        let mut unavailable: Option<String> = None;
        let mut steps = 0;
        loop {
            let event = self.state.pop_event();
            let current = self.state.current();

            let Some(transition) = ctx.machine.transition_for(current, event.as_ref()) else {
                return Ok(match (event, unavailable) {
                    (_, Some(message)) => TurnOutcome::LlmUnavailable { message },
                    (None, None) => TurnOutcome::Quiescent,
                    (Some(event), None) => {
                        let dropped = self.state.clear_events();
                        tracing::warn!(
                            state = %ctx.label(current),
                            event = %event.kind(),
                            dropped,
                            "No transition for event"
                        );
                        TurnOutcome::Unhandled { event }
                    }
                });
            };

            steps += 1;
            if steps > CASCADE_LIMIT {
                self.state.clear_events();
                self.restore(&ctx, resting);
                return Err(EngineError::CascadeLimit(CASCADE_LIMIT));
            }

            tracing::debug!(
                from = %ctx.label(current),
                to = %ctx.label(transition.target),
                event = %event.as_ref().map_or("ε".to_string(), |e| e.kind().to_string()),
                "Transition"
            );
            self.state.set_current(transition.target);

            let Some(action) = &transition.trigger.action else {
                continue;
            };
            match action.execute(&ctx, &mut self.state, event.as_ref()).await {
                Ok(()) => {}
                Err(EngineError::Llm(error)) if unavailable.is_none() => {
                    let dropped = self.state.clear_events();
                    tracing::error!(
                        state = %ctx.label(self.state.current()),
                        error = %error,
                        kind = ?error.kind,
                        dropped,
                        "LLM unavailable, abandoning turn"
                    );
                    self.restore(&ctx, resting);
                    let message = error.to_string();
                    self.state.push_event(Event::LlmUnavailable {
                        message: message.clone(),
                    });
                    unavailable = Some(message);
                }
                Err(e) => {
                    self.state.clear_events();
                    tracing::error!(error = %e, "Turn failed");
                    self.restore(&ctx, resting);
                    return Err(e);
                }
            }
        }
    }
}
