//! Compiled modules and the arena that owns them

use super::error::EngineError;
use super::execution::ExecutionState;
use super::gathering::{self, execute_action, finish_memory, parse_payload};
use super::parser::{keep_until_last_brace, parse_output, ParsedOutput};
use super::prompt::{build_request, PromptContext, PromptLayout, Section, ToolSummary};
use crate::llm::{LlmRequest, PromptTurn};
use crate::memory::{DataRecord, MemoryPiece, ScopeId};
use crate::spec::{ActionModule, ModuleSpec, QuestionAnsweringModule};
use crate::state_machine::{ActionContext, Event};
use serde_json::Value;
use std::collections::HashMap;

pub const ANSWER_MARKER: &str = "ANSWER_IS:";

const QA_INSTRUCTIONS: &str = "If you match the user question with questions in the list, \
reply ANSWER_IS: followed by the answer. Otherwise, reply exactly 'I do not know', followed \
by a summary of the questions that you know how to answer, replying in first person\n";

/// Index of a runtime module in its [`ModuleArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

impl ModuleId {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Prompt fragments generated for a module
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModulePrompts {
    pub presentation: String,
    pub task: String,
    /// Tool description shown to callers; `None` hides the module from
    /// tool listings
    pub activation: Option<String>,
}

/// Invocable form of a module: its prompts, its tools and its behaviour
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeModule {
    id: ModuleId,
    spec: ModuleSpec,
    prompts: ModulePrompts,
    tools: Vec<ModuleId>,
    layout: PromptLayout,
}

impl RuntimeModule {
    pub fn new(spec: ModuleSpec, prompts: ModulePrompts, tools: Vec<ModuleId>) -> Self {
        let layout = match spec {
            ModuleSpec::DataGathering(_) => PromptLayout::data_gathering(),
            _ => PromptLayout::conversational(),
        };
        Self {
            id: ModuleId(usize::MAX),
            spec,
            prompts,
            tools,
            layout,
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn spec(&self) -> &ModuleSpec {
        &self.spec
    }

    pub fn prompts(&self) -> &ModulePrompts {
        &self.prompts
    }

    pub fn tools(&self) -> &[ModuleId] {
        &self.tools
    }

    /// Presentation and task, as the head of the system turn
    pub fn system_prefix(&self) -> String {
        [self.prompts.presentation.as_str(), self.prompts.task.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Prompt sections suppressed when running in `context`
    pub fn disabled_sections(&self, context: PromptContext) -> Vec<Section> {
        match (&self.spec, context) {
            (
                ModuleSpec::Menu(_)
                | ModuleSpec::OpenEndedConversation(_)
                | ModuleSpec::DataGathering(_),
                PromptContext::Input,
            ) => vec![Section::Instruction],
            (
                ModuleSpec::Menu(_) | ModuleSpec::OpenEndedConversation(_),
                PromptContext::Reasoning,
            ) => vec![Section::Input],
            _ => Vec::new(),
        }
    }

    fn find_tool(&self, modules: &ModuleArena, name: &str) -> Result<ModuleId, EngineError> {
        let wanted = name.trim().trim_matches(|c| c == '[' || c == ']' || c == '`');
        self.tools
            .iter()
            .copied()
            .find(|id| modules.name(*id) == wanted)
            .ok_or_else(|| EngineError::UnknownTool {
                module: self.name().to_string(),
                tool: name.to_string(),
            })
    }

    // ========================================================================
    // LLM step
    // ========================================================================

    /// One reasoning step: prompt the LLM and push either a tool
    /// activation or the answer as an event
    pub async fn run(
        &self,
        ctx: &ActionContext<'_>,
        state: &mut ExecutionState,
        input: Option<&str>,
        allow_tools: bool,
        disabled: &[Section],
    ) -> Result<(), EngineError> {
        let tools: Vec<ToolSummary<'_>> = self
            .tools
            .iter()
            .map(|id| ctx.modules.get(*id))
            .filter_map(|tool| {
                tool.prompts.activation.as_deref().map(|activation| ToolSummary {
                    name: tool.name(),
                    activation,
                })
            })
            .collect();

        let human = self.layout.render(self.name(), state, input, disabled);
        let request = build_request(&self.system_prefix(), &tools, allow_tools, human);
        let output = ctx.services.invoke(self.name(), &request).await?;

        match parse_output(&output, allow_tools) {
            ParsedOutput::ToolCall { tool, input: payload, log } => {
                let target = self.find_tool(ctx.modules, &tool)?;
                tracing::info!(module = %self.name(), tool = %tool, "Tool activated");

                let mut previous_answer = MemoryPiece::new();
                if let Some(text) = input.filter(|t| !t.trim().is_empty()) {
                    previous_answer = previous_answer.human(text);
                }
                state.push_event(Event::ActivateModule {
                    target,
                    input: Some(payload),
                    previous_answer: previous_answer.ai_reasoning(log),
                });
            }
            ParsedOutput::Answer(text) => {
                state.push_event(Event::AiResponse { text });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Tool behaviour
    // ========================================================================

    /// Behaviour when invoked as a tool by `event`
    pub async fn run_as_tool(
        &self,
        ctx: &ActionContext<'_>,
        state: &mut ExecutionState,
        event: Option<&Event>,
    ) -> Result<(), EngineError> {
        let payload = match event {
            Some(Event::ActivateModule { input, .. }) => input.as_deref(),
            Some(Event::UserInput { text }) => Some(text.as_str()),
            _ => None,
        };

        match &self.spec {
            ModuleSpec::Menu(_) | ModuleSpec::OpenEndedConversation(_) => {
                let disabled = self.disabled_sections(PromptContext::Input);
                state.thinking();
                let result = self.run(ctx, state, payload, true, &disabled).await;
                state.stop_thinking();
                result
            }
            ModuleSpec::DataGathering(spec) => {
                gathering::collect(self.name(), spec, payload, ctx.services, state).await
            }
            ModuleSpec::QuestionAnswering(spec) => {
                self.answer_question(ctx, state, spec, payload.unwrap_or_default())
                    .await
            }
            ModuleSpec::Sequence(_) => self.dispatch_sequence(ctx, state, event),
            ModuleSpec::Action(spec) => self.perform_action(ctx, state, spec, event).await,
        }
    }

    async fn answer_question(
        &self,
        ctx: &ActionContext<'_>,
        state: &mut ExecutionState,
        spec: &QuestionAnsweringModule,
        payload: &str,
    ) -> Result<(), EngineError> {
        let question = get_question(payload);
        let prompt = format!(
            "{}\n{QA_INSTRUCTIONS}\nPlease answer the following question:\n{question}",
            self.system_prefix()
        );
        let request = LlmRequest::new(vec![PromptTurn::human(prompt)]);

        state.thinking();
        let output = ctx.services.invoke(self.name(), &request).await;
        state.stop_thinking();

        let answer = output?.replace(ANSWER_MARKER, "").trim().to_string();
        let mut data = DataRecord::new();
        data.insert("result".to_string(), Value::String(answer.clone()));
        data.insert("question".to_string(), Value::String(question));

        let response =
            execute_action(self.name(), spec.on_success.as_ref(), data, answer, ctx.services)
                .await?;
        state.push_event(Event::TaskFinish {
            memory: finish_memory(None, &response),
            result: Some(response),
            data: None,
        });
        Ok(())
    }

    /// Enter the first step, or leave once the last step has finished.
    /// The exit carries no result: the last step's result has already been
    /// said.
    fn dispatch_sequence(
        &self,
        ctx: &ActionContext<'_>,
        state: &mut ExecutionState,
        event: Option<&Event>,
    ) -> Result<(), EngineError> {
        match event {
            Some(Event::TaskFinish { memory, data, .. }) => {
                state.push_event(Event::TaskFinish {
                    result: None,
                    memory: memory.clone(),
                    data: data.clone(),
                });
            }
            _ => {
                let first = self.tools.first().copied().ok_or_else(|| {
                    EngineError::UnknownTool {
                        module: self.name().to_string(),
                        tool: "<first step>".to_string(),
                    }
                })?;
                let (input, previous_answer) = match event {
                    Some(Event::ActivateModule {
                        input,
                        previous_answer,
                        ..
                    }) => (input.clone(), previous_answer.clone()),
                    _ => (None, MemoryPiece::new()),
                };
                tracing::debug!(
                    sequence = %self.name(),
                    step = %ctx.modules.name(first),
                    "Entering sequence"
                );
                state.push_event(Event::ActivateModule {
                    target: first,
                    input,
                    previous_answer,
                });
            }
        }
        Ok(())
    }

    /// Run an action module's effect on data collected earlier: its own
    /// collected data bucket, the finishing step's data, then whatever any
    /// module completed with
    async fn perform_action(
        &self,
        ctx: &ActionContext<'_>,
        state: &mut ExecutionState,
        spec: &ActionModule,
        event: Option<&Event>,
    ) -> Result<(), EngineError> {
        let mut available = state
            .memory()
            .bucket(self.name(), ScopeId::CollectedData)
            .map(crate::memory::ConversationMemory::data)
            .unwrap_or_default();
        if let Some(Event::TaskFinish {
            data: Some(data), ..
        }) = event
        {
            available.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut data = DataRecord::new();
        for property in &spec.data {
            let value = available
                .get(&property.name)
                .or_else(|| state.find_side_value(&property.name))
                .cloned();
            match value {
                Some(value) => {
                    data.insert(property.name.clone(), value);
                }
                None if property.required => {
                    return Err(EngineError::MissingActionData {
                        module: self.name().to_string(),
                        property: property.name.clone(),
                    });
                }
                None => {}
            }
        }

        let result = execute_action(
            self.name(),
            Some(&spec.on_success),
            data,
            String::new(),
            ctx.services,
        )
        .await?;
        state.push_event(Event::TaskFinish {
            memory: finish_memory(None, &result),
            result: Some(result),
            data: None,
        });
        Ok(())
    }
}

/// Question from a QA tool payload: `Question: ...`, a JSON object with a
/// `question` field, or the payload itself
pub fn get_question(payload: &str) -> String {
    let payload = payload.trim();
    if let Some(question) = payload.strip_prefix("Question:") {
        return question.trim().to_string();
    }
    let record = parse_payload(Some(keep_until_last_brace(payload)));
    match record.get("question") {
        Some(Value::String(question)) => question.trim().to_string(),
        _ => payload.to_string(),
    }
}

// ============================================================================
// Arena
// ============================================================================

/// All runtime modules of a compiled chatbot, one per module name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleArena {
    modules: Vec<RuntimeModule>,
    by_name: HashMap<String, ModuleId>,
}

impl ModuleArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next inserted module will get
    pub fn next_id(&self) -> ModuleId {
        ModuleId(self.modules.len())
    }

    pub fn insert(&mut self, mut module: RuntimeModule) -> ModuleId {
        let id = self.next_id();
        module.id = id;
        self.by_name.insert(module.name().to_string(), id);
        self.modules.push(module);
        id
    }

    pub fn get(&self, id: ModuleId) -> &RuntimeModule {
        &self.modules[id.0]
    }

    pub fn name(&self, id: ModuleId) -> &str {
        self.modules[id.0].name()
    }

    pub fn lookup(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuntimeModule> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
