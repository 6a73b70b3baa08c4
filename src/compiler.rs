//! Module compiler
//!
//! Lowers a [`ChatbotModel`] into one [`StateMachine`] plus the arena of
//! runtime modules its actions refer to. Runtime modules are generated once
//! per module name; states are created per occurrence, so a module used
//! from two menus gets two states sharing one runtime module.
//!
//! Compilation is pure: the same model and configuration always produce
//! the same machine.

mod prompts;
#[cfg(test)]
mod proptests;

use crate::config::Configuration;
use crate::memory::MessageKind;
use crate::runtime::{ModuleArena, ModuleId, PromptContext, RuntimeModule};
use crate::spec::{ChatbotModel, Item, MemoryScope, ModuleSpec, RephraseMode, SequenceModule, SpecError};
use crate::state_machine::{
    to_dot, Action, Event, EventKind, EventMatcher, SayMessage, StateMachine, VertexId,
};
use thiserror::Error;

/// Kinds forwarded between steps of a sequence with full memory
const SHARED_KINDS: &[MessageKind] = &[MessageKind::Human, MessageKind::AiResponse, MessageKind::Data];

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("module '{module}' declares unsupported rephrase mode '{mode}'")]
    UnsupportedRephrase { module: String, mode: String },

    #[error("open-ended conversation '{module}' cannot use sequence '{sequence}'")]
    SequenceInOpenEnded { module: String, sequence: String },

    #[error("sequence '{0}' has no steps")]
    EmptySequence(String),

    #[error("module '{name}' of kind {kind} cannot be the entry module")]
    UnsupportedEntry { name: String, kind: &'static str },

    #[error(transparent)]
    Spec(#[from] SpecError),
}

/// Compiled chatbot, read-only and shared by every conversation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledChatbot {
    machine: StateMachine,
    modules: ModuleArena,
    entry: ModuleId,
}

impl CompiledChatbot {
    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn modules(&self) -> &ModuleArena {
        &self.modules
    }

    pub fn entry(&self) -> ModuleId {
        self.entry
    }

    pub fn entry_name(&self) -> &str {
        self.modules.name(self.entry)
    }

    /// Graphviz rendering of the machine
    pub fn to_dot(&self) -> String {
        to_dot(&self.machine, &self.modules)
    }
}

pub fn compile(
    model: &ChatbotModel,
    configuration: &Configuration,
) -> Result<CompiledChatbot, CompileError> {
    let entry_spec = model.entry();
    let entry_presentation = match entry_spec {
        ModuleSpec::Menu(m) => m.presentation.clone(),
        ModuleSpec::OpenEndedConversation(m) => m.presentation.clone(),
        ModuleSpec::DataGathering(m) => m.description.clone(),
        other => {
            return Err(CompileError::UnsupportedEntry {
                name: other.name().to_string(),
                kind: other.kind_name(),
            })
        }
    };

    let mut compiler = Compiler {
        model,
        configuration,
        languages_prompt: configuration.languages_prompt(),
        entry_presentation,
        machine: StateMachine::new(),
        modules: ModuleArena::new(),
        entry: None,
    };

    let entry = compiler.generate(entry_spec.clone(), &[])?;
    compiler.entry = Some(entry);
    let entry_vertex = compiler.add_state(entry, None)?;

    let greeting = configuration
        .greeting()
        .map(|text| vec![Action::Say(SayMessage::Text(text.to_string()))])
        .unwrap_or_default();
    let initial = compiler.machine.initial();
    compiler.connect(initial, entry_vertex, None, greeting);

    if matches!(entry_spec, ModuleSpec::DataGathering(_)) {
        compiler.connect(
            entry_vertex,
            entry_vertex,
            Some(EventMatcher::Kind(EventKind::TaskFinish)),
            vec![Action::Say(SayMessage::FromEvent)],
        );
    }

    tracing::info!(
        entry = %entry_spec.name(),
        modules = compiler.modules.len(),
        vertices = compiler.machine.vertex_ids().count(),
        transitions = compiler.machine.transitions().len(),
        "Chatbot compiled"
    );

    Ok(CompiledChatbot {
        machine: compiler.machine,
        modules: compiler.modules,
        entry,
    })
}

struct Compiler<'a> {
    model: &'a ChatbotModel,
    configuration: &'a Configuration,
    languages_prompt: String,
    entry_presentation: String,
    machine: StateMachine,
    modules: ModuleArena,
    entry: Option<ModuleId>,
}

impl<'a> Compiler<'a> {
    fn resolve(&self, owner: &str, reference: &str) -> Result<&'a ModuleSpec, CompileError> {
        let model: &'a ChatbotModel = self.model;
        model.resolve(reference).ok_or_else(|| {
            SpecError::UnknownReference {
                module: owner.to_string(),
                reference: reference.to_string(),
            }
            .into()
        })
    }

    /// Module an item delegates to; answers delegate to none
    fn item_target(&self, owner: &str, item: &Item) -> Result<Option<ModuleSpec>, CompileError> {
        match item {
            Item::Answer { .. } => Ok(None),
            Item::Tool { target, .. } => Ok(Some(self.resolve(owner, target)?.clone())),
            Item::Sequence { .. } => Ok(item.inline_sequence().map(ModuleSpec::Sequence)),
        }
    }

    fn connect(
        &mut self,
        source: VertexId,
        target: VertexId,
        event: Option<EventMatcher>,
        actions: Vec<Action>,
    ) {
        let action = (!actions.is_empty()).then(|| Action::composite(actions));
        self.machine.add_transition(source, target, event, action);
    }

    fn mode(&self, module: ModuleId) -> RephraseMode {
        self.modules
            .get(module)
            .spec()
            .on_success()
            .and_then(|on_success| on_success.response.mode())
            .unwrap_or(RephraseMode::Direct)
    }

    // ========================================================================
    // Runtime modules
    // ========================================================================

    /// Runtime module for `spec`, generated on first use. `go_back` lists
    /// earlier sequence steps the module may re-enter.
    fn generate(&mut self, spec: ModuleSpec, go_back: &[ModuleId]) -> Result<ModuleId, CompileError> {
        if let Some(id) = self.modules.lookup(spec.name()) {
            return Ok(id);
        }
        check_rephrase(&spec)?;

        let (prompts, tools) = match &spec {
            ModuleSpec::Menu(m) => {
                let mut tools = self.item_tools(&m.name, &m.items, false)?;
                tools.extend_from_slice(go_back);
                (prompts::menu(m, &self.languages_prompt), tools)
            }
            ModuleSpec::OpenEndedConversation(m) => {
                let mut tools = self.item_tools(&m.name, &m.items, true)?;
                tools.extend_from_slice(go_back);
                (prompts::open_ended(m, &self.languages_prompt), tools)
            }
            ModuleSpec::DataGathering(m) => {
                // The module calls itself to hand over what it extracted
                let mut tools = go_back.to_vec();
                tools.push(self.modules.next_id());
                (prompts::data_gathering(m, &self.entry_presentation), tools)
            }
            ModuleSpec::QuestionAnswering(m) => (
                prompts::question_answering(m, &self.entry_presentation),
                Vec::new(),
            ),
            ModuleSpec::Sequence(m) => {
                let steps = self.sequence_steps(m)?;
                (prompts::sequence(m, &self.entry_presentation), steps)
            }
            ModuleSpec::Action(_) => (prompts::action(&self.entry_presentation), Vec::new()),
        };

        let name = spec.name().to_string();
        let id = self.modules.insert(RuntimeModule::new(spec, prompts, tools));
        tracing::debug!(module = %name, id = id.index(), "Runtime module generated");
        Ok(id)
    }

    fn item_tools(
        &mut self,
        owner: &str,
        items: &[Item],
        open_ended: bool,
    ) -> Result<Vec<ModuleId>, CompileError> {
        let mut tools = Vec::new();
        for item in items {
            let Some(target) = self.item_target(owner, item)? else {
                continue;
            };
            if open_ended && matches!(target, ModuleSpec::Sequence(_)) {
                return Err(CompileError::SequenceInOpenEnded {
                    module: owner.to_string(),
                    sequence: target.name().to_string(),
                });
            }
            tools.push(self.generate(target, &[])?);
        }
        Ok(tools)
    }

    fn sequence_steps(&mut self, sequence: &SequenceModule) -> Result<Vec<ModuleId>, CompileError> {
        if sequence.references.is_empty() {
            return Err(CompileError::EmptySequence(sequence.name.clone()));
        }
        let mut steps = Vec::with_capacity(sequence.references.len());
        for reference in &sequence.references {
            let spec = self.resolve(&sequence.name, reference)?.clone();
            let go_back = if sequence.go_back { steps.clone() } else { Vec::new() };
            steps.push(self.generate(spec, &go_back)?);
        }
        Ok(steps)
    }

    // ========================================================================
    // States
    // ========================================================================

    /// New state (or composite) for `module` inside `parent`, with the
    /// transitions its kind needs
    fn add_state(&mut self, module: ModuleId, parent: Option<VertexId>) -> Result<VertexId, CompileError> {
        let spec = self.modules.get(module).spec().clone();
        let vertex = match &spec {
            ModuleSpec::Sequence(sequence) => self.add_sequence(module, sequence, parent)?,
            _ => self.machine.add_state(module, parent),
        };

        let unavailable = self.configuration.unavailable_message.clone();
        self.connect(
            vertex,
            vertex,
            Some(EventMatcher::Kind(EventKind::LlmUnavailable)),
            vec![Action::Say(SayMessage::Text(unavailable))],
        );

        match &spec {
            ModuleSpec::Menu(menu) => {
                self.add_conversation_loops(vertex, module);
                self.add_items(vertex, module, &menu.items, parent, false)?;
            }
            ModuleSpec::OpenEndedConversation(open) => {
                self.add_conversation_loops(vertex, module);
                self.add_items(vertex, module, &open.items, parent, true)?;
            }
            ModuleSpec::DataGathering(_) => {
                self.add_conversation_loops(vertex, module);
                self.connect(
                    vertex,
                    vertex,
                    Some(EventMatcher::Kind(EventKind::TaskInProgress)),
                    vec![
                        Action::UpdateMemory { module },
                        Action::ApplyLlm {
                            module,
                            allow_tools: false,
                        },
                    ],
                );
                self.connect(
                    vertex,
                    vertex,
                    Some(EventMatcher::Activate(module)),
                    vec![Action::RunTool { module }, Action::UpdateMemory { module }],
                );
            }
            ModuleSpec::QuestionAnswering(_) | ModuleSpec::Action(_) | ModuleSpec::Sequence(_) => {}
        }
        Ok(vertex)
    }

    /// User input runs the module's LLM; its answers are remembered and said
    fn add_conversation_loops(&mut self, vertex: VertexId, module: ModuleId) {
        let disabled = self.modules.get(module).disabled_sections(PromptContext::Input);
        self.connect(
            vertex,
            vertex,
            Some(EventMatcher::Kind(EventKind::UserInput)),
            vec![
                Action::RunModule { module, disabled },
                Action::UpdateMemory { module },
            ],
        );
        self.connect(
            vertex,
            vertex,
            Some(EventMatcher::Kind(EventKind::AiResponse)),
            vec![
                Action::UpdateMemory { module },
                Action::Say(SayMessage::FromEvent),
            ],
        );
    }

    /// Activation and return edges between a menu-like state and the
    /// modules its items delegate to
    fn add_items(
        &mut self,
        vertex: VertexId,
        owner: ModuleId,
        items: &[Item],
        parent: Option<VertexId>,
        open_ended: bool,
    ) -> Result<(), CompileError> {
        let owner_name = self.modules.name(owner).to_string();
        let nested = self.entry != Some(owner);

        for item in items {
            let Some(target) = self.item_target(&owner_name, item)? else {
                continue;
            };
            let child = self.generate(target, &[])?;
            let child_vertex = self.add_state(child, parent)?;

            let in_caller = open_ended || self.mode(child) == RephraseMode::InCaller;
            let (activation, finish) = if in_caller {
                let mut finish = vec![Action::UpdateMemory { module: owner }];
                if nested && !open_ended {
                    finish.push(Action::PushEvent(Event::finish(None)));
                }
                finish.push(Action::ApplyLlm {
                    module: owner,
                    allow_tools: false,
                });
                let mut activation = Vec::new();
                if !open_ended {
                    activation.push(Action::UpdateMemory { module: owner });
                }
                activation.extend([
                    Action::RunTool { module: child },
                    Action::UpdateMemory { module: child },
                ]);
                (activation, finish)
            } else {
                let mut finish = Vec::new();
                if !self.modules.get(child).spec().is_menu() {
                    finish.push(Action::Say(SayMessage::FromEvent));
                }
                if nested {
                    finish.push(Action::PushEvent(Event::finish(None)));
                }
                (
                    vec![
                        Action::RunTool { module: child },
                        Action::UpdateMemory { module: child },
                    ],
                    finish,
                )
            };

            self.connect(vertex, child_vertex, Some(EventMatcher::Activate(child)), activation);
            self.connect(
                child_vertex,
                vertex,
                Some(EventMatcher::Kind(EventKind::TaskFinish)),
                finish,
            );
        }
        Ok(())
    }

    /// Composite state chaining the steps of a sequence
    fn add_sequence(
        &mut self,
        module: ModuleId,
        sequence: &SequenceModule,
        parent: Option<VertexId>,
    ) -> Result<VertexId, CompileError> {
        let composite = self.machine.add_composite(module, parent);
        let initial = self
            .machine
            .nested_initial(composite)
            .ok_or_else(|| CompileError::EmptySequence(sequence.name.clone()))?;

        let steps = self.modules.get(module).tools().to_vec();
        let mut vertices = Vec::with_capacity(steps.len());
        for &step in &steps {
            vertices.push(self.add_state(step, Some(composite))?);
        }
        let (Some(&first), Some(&first_vertex), Some(&last_vertex)) =
            (steps.first(), vertices.first(), vertices.last())
        else {
            return Err(CompileError::EmptySequence(sequence.name.clone()));
        };

        self.connect(
            initial,
            first_vertex,
            Some(EventMatcher::Activate(first)),
            vec![
                Action::RunTool { module: first },
                Action::UpdateMemory { module: first },
            ],
        );

        for (i, (step_pair, vertex_pair)) in steps.windows(2).zip(vertices.windows(2)).enumerate() {
            let (done, next) = (step_pair[0], step_pair[1]);
            let mut actions = vec![Action::UpdateMemory { module: done }];
            if sequence.memory_scope == MemoryScope::Full {
                actions.extend(steps.iter().skip(i + 1).map(|&later| Action::CopyMemory {
                    from: done,
                    to: later,
                    filter: SHARED_KINDS.to_vec(),
                }));
            }
            actions.extend([Action::Say(SayMessage::FromEvent), Action::RunTool { module: next }]);
            self.connect(
                vertex_pair[0],
                vertex_pair[1],
                Some(EventMatcher::Kind(EventKind::TaskFinish)),
                actions,
            );
        }

        if sequence.go_back {
            for (later, &later_vertex) in vertices.iter().enumerate().skip(1) {
                for (&earlier, &earlier_vertex) in steps.iter().zip(&vertices).take(later) {
                    self.connect(
                        later_vertex,
                        earlier_vertex,
                        Some(EventMatcher::Activate(earlier)),
                        vec![
                            Action::RunTool { module: earlier },
                            Action::UpdateMemory { module: earlier },
                        ],
                    );
                }
            }
        }

        self.connect(
            last_vertex,
            composite,
            Some(EventMatcher::Kind(EventKind::TaskFinish)),
            vec![Action::Say(SayMessage::FromEvent), Action::RunTool { module }],
        );
        Ok(composite)
    }
}

fn check_rephrase(spec: &ModuleSpec) -> Result<(), CompileError> {
    match spec.on_success() {
        Some(on_success) if on_success.response.mode().is_none() => {
            Err(CompileError::UnsupportedRephrase {
                module: spec.name().to_string(),
                mode: on_success.response.rephrase.clone().unwrap_or_default(),
            })
        }
        _ => Ok(()),
    }
}
