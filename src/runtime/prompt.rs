//! Prompt assembly for a module's LLM step
//!
//! The system turn holds the module's presentation and task, the tool
//! catalogue and the reasoning format. The human turn is made of named
//! sections filled from the module's memory buckets; callers may disable
//! sections for a given invocation.

use super::execution::ExecutionState;
use crate::llm::{LlmRequest, PromptTurn};
use crate::memory::{MessageKind, ScopeId};

pub const STOP_SEQUENCE: &str = "\nObservation:";

const FORMAT_INSTRUCTIONS: &str = "You have tools to help you achieve some of your tasks. \
To use a tool, please use the following format:
```
Thought: Do I need to use a tool? Yes
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
```

When you have a response to say to the Human, or if you do not need to use a tool, you MUST use the format:

```
Thought: Do I need to use a tool? No
{ai_prefix}: [your response here]
```";

const NO_TOOL_INSTRUCTIONS: &str = "To respond to the Human you MUST use the format:

```
Thought: Do I need to use a tool? No
{ai_prefix}: [your response here]
```";

/// Named part of the human turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    History,
    CollectedData,
    Instruction,
    Input,
}

/// Why the module's LLM step is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptContext {
    /// Responding to new user input
    Input,
    /// Re-reasoning over memory after an internal event
    Reasoning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptSection {
    pub section: Section,
    pub header: &'static str,
    /// Bucket rendered after the header; `None` renders the input
    pub scope: Option<ScopeId>,
    pub kinds: Option<&'static [MessageKind]>,
    pub footer: &'static str,
}

/// Ordered sections of a module's human turn
#[derive(Debug, Clone, PartialEq)]
pub struct PromptLayout {
    sections: Vec<PromptSection>,
}

const CONVERSATION_KINDS: &[MessageKind] = &[MessageKind::Human, MessageKind::AiResponse];
const DATA_KINDS: &[MessageKind] = &[MessageKind::Data];
const INSTRUCTION_KINDS: &[MessageKind] = &[MessageKind::Instruction];

impl PromptLayout {
    /// Menus and open-ended conversations: full history, then input, then
    /// any pending instruction
    pub fn conversational() -> Self {
        Self {
            sections: vec![
                PromptSection {
                    section: Section::History,
                    header: "Begin!\n\nPrevious conversation history:\n",
                    scope: Some(ScopeId::History),
                    kinds: None,
                    footer: "",
                },
                PromptSection {
                    section: Section::Input,
                    header: "",
                    scope: None,
                    kinds: None,
                    footer: "\n",
                },
                PromptSection {
                    section: Section::Instruction,
                    header: "",
                    scope: Some(ScopeId::Instruction),
                    kinds: Some(INSTRUCTION_KINDS),
                    footer: "",
                },
            ],
        }
    }

    /// Data gathering: conversation, collected data, instruction, input
    pub fn data_gathering() -> Self {
        Self {
            sections: vec![
                PromptSection {
                    section: Section::History,
                    header: "Previous conversation history:\n",
                    scope: Some(ScopeId::History),
                    kinds: Some(CONVERSATION_KINDS),
                    footer: "",
                },
                PromptSection {
                    section: Section::CollectedData,
                    header: "Data already collected: ",
                    scope: Some(ScopeId::CollectedData),
                    kinds: Some(DATA_KINDS),
                    footer: "",
                },
                PromptSection {
                    section: Section::Instruction,
                    header: "",
                    scope: Some(ScopeId::Instruction),
                    kinds: Some(INSTRUCTION_KINDS),
                    footer: "",
                },
                PromptSection {
                    section: Section::Input,
                    header: "",
                    scope: None,
                    kinds: None,
                    footer: "",
                },
            ],
        }
    }

    pub fn sections(&self) -> &[PromptSection] {
        &self.sections
    }

    /// Render the human turn for `module`
    pub fn render(
        &self,
        module: &str,
        state: &ExecutionState,
        input: Option<&str>,
        disabled: &[Section],
    ) -> String {
        self.sections
            .iter()
            .filter(|s| !disabled.contains(&s.section))
            .map(|s| {
                let body = match s.scope {
                    Some(scope) => state
                        .memory()
                        .bucket(module, scope)
                        .map(|bucket| bucket.render(s.kinds))
                        .unwrap_or_default(),
                    None => render_input(input),
                };
                format!("{}{}{}", s.header, body, s.footer)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn render_input(input: Option<&str>) -> String {
    match input.map(str::trim) {
        Some(text) if !text.is_empty() => format!("New input: {text}"),
        _ => String::new(),
    }
}

/// Tool entry shown in the system turn
pub struct ToolSummary<'a> {
    pub name: &'a str,
    pub activation: &'a str,
}

pub fn tools_prompt(tools: &[ToolSummary<'_>]) -> String {
    if tools.is_empty() {
        return String::new();
    }
    let entries: Vec<String> = tools
        .iter()
        .map(|t| format!("> {}: {}", t.name, t.activation))
        .collect();
    format!("Tools:\n{}", entries.join("\n\n"))
}

pub fn format_instructions(tool_names: &str, allow_tools: bool) -> String {
    let template = if allow_tools {
        FORMAT_INSTRUCTIONS
    } else {
        NO_TOOL_INSTRUCTIONS
    };
    template
        .replace("{tool_names}", tool_names)
        .replace("{ai_prefix}", super::parser::AI_PREFIX)
}

/// Full request for one reasoning step
pub fn build_request(
    system_prefix: &str,
    tools: &[ToolSummary<'_>],
    allow_tools: bool,
    human: String,
) -> LlmRequest {
    let names = tools.iter().map(|t| t.name).collect::<Vec<_>>().join(", ");
    let (tools_text, instructions) = if allow_tools {
        (tools_prompt(tools), format_instructions(&names, true))
    } else {
        (String::new(), format_instructions(&names, false))
    };
    let system = [system_prefix, &tools_text, &instructions, ""].join("\n\n");

    LlmRequest::new(vec![PromptTurn::system(system), PromptTurn::human(human)])
        .with_stop(STOP_SEQUENCE)
}
