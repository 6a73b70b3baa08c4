//! Actions attached to transitions

use super::event::Event;
use super::machine::{StateMachine, VertexId};
use crate::memory::{MemoryPiece, MessageKind, ScopeId};
use crate::runtime::{
    EngineError, ExecutionState, ModuleArena, ModuleId, PromptContext, Section, Services,
};
use std::future::Future;
use std::pin::Pin;

/// What a say action outputs
#[derive(Debug, Clone, PartialEq)]
pub enum SayMessage {
    Text(String),
    /// The triggering event's message; nothing is said if it has none
    FromEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write to the output channel, attributed to the current state
    Say(SayMessage),

    /// Run the module's LLM step on the triggering user input
    RunModule {
        module: ModuleId,
        disabled: Vec<Section>,
    },

    /// Re-run the module's LLM step over its memory, without new input
    ApplyLlm { module: ModuleId, allow_tools: bool },

    /// Invoke the module's tool behaviour with the triggering event
    RunTool { module: ModuleId },

    /// Fold the triggering event into the module's memory buckets
    UpdateMemory { module: ModuleId },

    /// Forward `from`'s history and collected data into `to`
    CopyMemory {
        from: ModuleId,
        to: ModuleId,
        filter: Vec<MessageKind>,
    },

    PushEvent(Event),

    /// Run actions in order, notifying listeners after each one
    Composite(Vec<Action>),
}

/// Read-only view of the compiled chatbot and its collaborators
pub struct ActionContext<'a> {
    pub machine: &'a StateMachine,
    pub modules: &'a ModuleArena,
    pub services: &'a Services,
}

impl ActionContext<'_> {
    /// Display name of a vertex: its module's name
    pub fn label(&self, vertex: VertexId) -> &str {
        self.machine
            .vertex(vertex)
            .module()
            .map_or("initial", |module| self.modules.name(module))
    }
}

impl Action {
    /// Composite action, with nested composites flattened
    pub fn composite(actions: Vec<Action>) -> Self {
        let mut flat = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                Action::Composite(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Action::Composite(flat)
    }

    /// Text this action outputs for `event`, if it is a say action
    pub fn said_text<'a>(&'a self, event: Option<&'a Event>) -> Option<&'a str> {
        match self {
            Action::Say(SayMessage::Text(text)) => Some(text),
            Action::Say(SayMessage::FromEvent) => event.and_then(Event::message),
            _ => None,
        }
    }

    pub async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        state: &mut ExecutionState,
        event: Option<&Event>,
    ) -> Result<(), EngineError> {
        match self {
            Action::Composite(actions) => {
                for action in actions {
                    action.execute_step(ctx, state, event).await?;
                    state.notify_listeners(action, event);
                }
                Ok(())
            }
            action => {
                action.execute_step(ctx, state, event).await?;
                state.notify_listeners(action, event);
                Ok(())
            }
        }
    }

    /// Boxed `execute` for composites nested inside composites
    fn execute_nested<'a, 'b: 'a>(
        &'a self,
        ctx: &'a ActionContext<'b>,
        state: &'a mut ExecutionState,
        event: Option<&'a Event>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(self.execute(ctx, state, event))
    }

    async fn execute_step(
        &self,
        ctx: &ActionContext<'_>,
        state: &mut ExecutionState,
        event: Option<&Event>,
    ) -> Result<(), EngineError> {
        match self {
            Action::Say(_) => {
                if let Some(text) = self.said_text(event) {
                    let who = ctx.label(state.current());
                    state.output(text, who);
                }
                Ok(())
            }
            Action::RunModule { module, disabled } => {
                let input = match event {
                    Some(Event::UserInput { text }) => Some(text.as_str()),
                    _ => None,
                };
                state.thinking();
                let result = ctx
                    .modules
                    .get(*module)
                    .run(ctx, state, input, true, disabled)
                    .await;
                state.stop_thinking();
                result
            }
            Action::ApplyLlm {
                module,
                allow_tools,
            } => {
                let runtime = ctx.modules.get(*module);
                let disabled = runtime.disabled_sections(PromptContext::Reasoning);
                state.thinking();
                let result = runtime.run(ctx, state, None, *allow_tools, &disabled).await;
                state.stop_thinking();
                result
            }
            Action::RunTool { module } => {
                ctx.modules.get(*module).run_as_tool(ctx, state, event).await
            }
            Action::UpdateMemory { module } => {
                if let Some(event) = event {
                    fold_event(ctx.modules.name(*module), state, event);
                }
                Ok(())
            }
            Action::CopyMemory { from, to, filter } => {
                let (from, to) = (ctx.modules.name(*from), ctx.modules.name(*to));
                for scope in [ScopeId::History, ScopeId::CollectedData] {
                    state.memory_mut().copy(from, to, scope, Some(filter));
                }
                Ok(())
            }
            Action::PushEvent(pushed) => {
                state.push_event(pushed.clone());
                Ok(())
            }
            Action::Composite(actions) => {
                for action in actions {
                    action.execute_nested(ctx, state, event).await?;
                }
                Ok(())
            }
        }
    }
}

fn fold_event(module: &str, state: &mut ExecutionState, event: &Event) {
    let memory = state.memory_mut();
    match event {
        Event::ActivateModule {
            previous_answer, ..
        } => memory.add(module, ScopeId::History, previous_answer),
        Event::UserInput { text } => {
            memory.add(module, ScopeId::History, &MemoryPiece::new().human(text.clone()));
        }
        Event::AiResponse { text } => {
            memory.add(
                module,
                ScopeId::History,
                &MemoryPiece::new().ai_response(text.clone()),
            );
        }
        Event::TaskInProgress { memory: delta } | Event::TaskFinish { memory: delta, .. } => {
            for (scope, piece) in delta {
                memory.add(module, *scope, piece);
            }
        }
        Event::LlmUnavailable { .. } => {}
    }
}
