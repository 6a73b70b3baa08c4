//! Declarative chatbot model
//!
//! A chatbot is a set of named modules (menus, data gathering forms,
//! question answering lists, sequences, actions and open-ended
//! conversations) that reference each other by name. Documents are JSON;
//! see [`ChatbotModel::load`].

mod graph;
mod loader;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Errors raised while loading or validating a chatbot model
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate module name: {0}")]
    DuplicateModule(String),

    #[error("module '{module}' references unknown module '{reference}'")]
    UnknownReference { module: String, reference: String },

    #[error("module reference graph contains a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("cannot determine the entry module, candidates: {}", .0.join(", "))]
    AmbiguousEntry(Vec<String>),

    #[error("entry module '{0}' is not defined")]
    UnknownEntry(String),

    #[error("chatbot model has no modules")]
    Empty,
}

// ============================================================================
// Modules
// ============================================================================

/// One declarative module, discriminated by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleSpec {
    Menu(MenuModule),
    DataGathering(DataGatheringModule),
    QuestionAnswering(QuestionAnsweringModule),
    Sequence(SequenceModule),
    Action(ActionModule),
    #[serde(alias = "open_ended")]
    OpenEndedConversation(OpenEndedModule),
}

impl ModuleSpec {
    pub fn name(&self) -> &str {
        match self {
            ModuleSpec::Menu(m) => &m.name,
            ModuleSpec::DataGathering(m) => &m.name,
            ModuleSpec::QuestionAnswering(m) => &m.name,
            ModuleSpec::Sequence(m) => &m.name,
            ModuleSpec::Action(m) => &m.name,
            ModuleSpec::OpenEndedConversation(m) => &m.name,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ModuleSpec::Menu(_) => "menu",
            ModuleSpec::DataGathering(_) => "data_gathering",
            ModuleSpec::QuestionAnswering(_) => "question_answering",
            ModuleSpec::Sequence(_) => "sequence",
            ModuleSpec::Action(_) => "action",
            ModuleSpec::OpenEndedConversation(_) => "open_ended_conversation",
        }
    }

    /// Effect descriptor run when the module completes, if any
    pub fn on_success(&self) -> Option<&OnSuccess> {
        match self {
            ModuleSpec::DataGathering(m) => m.on_success.as_ref(),
            ModuleSpec::QuestionAnswering(m) => m.on_success.as_ref(),
            ModuleSpec::Action(m) => Some(&m.on_success),
            _ => None,
        }
    }

    pub fn is_menu(&self) -> bool {
        matches!(self, ModuleSpec::Menu(_))
    }

    /// Names of the modules this one refers to, in declaration order.
    /// Inline sequence items contribute their step references.
    pub fn references(&self) -> Vec<&str> {
        match self {
            ModuleSpec::Menu(MenuModule { items, .. })
            | ModuleSpec::OpenEndedConversation(OpenEndedModule { items, .. }) => items
                .iter()
                .flat_map(|item| match item {
                    Item::Answer { .. } => Vec::new(),
                    Item::Tool { target, .. } => vec![target.as_str()],
                    Item::Sequence { references, .. } => {
                        references.iter().map(String::as_str).collect()
                    }
                })
                .collect(),
            ModuleSpec::Sequence(m) => m.references.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuModule {
    pub name: String,
    pub presentation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenEndedModule {
    pub name: String,
    #[serde(default)]
    pub presentation: String,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGatheringModule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub data: Vec<DataProperty>,
    #[serde(
        default,
        rename = "on-success",
        alias = "on_success",
        skip_serializing_if = "Option::is_none"
    )]
    pub on_success: Option<OnSuccess>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnsweringModule {
    pub name: String,
    pub description: String,
    pub questions: Vec<QuestionAnswer>,
    #[serde(
        default,
        rename = "on-success",
        alias = "on_success",
        skip_serializing_if = "Option::is_none"
    )]
    pub on_success: Option<OnSuccess>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceModule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub references: Vec<String>,
    #[serde(default, rename = "memory")]
    pub memory_scope: MemoryScope,
    #[serde(default = "default_go_back", rename = "goback")]
    pub go_back: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionModule {
    pub name: String,
    #[serde(default)]
    pub data: Vec<DataProperty>,
    #[serde(rename = "on-success", alias = "on_success")]
    pub on_success: OnSuccess,
}

fn default_go_back() -> bool {
    true
}

/// How much conversation memory the steps of a sequence share
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    #[default]
    Individual,
    Full,
}

// ============================================================================
// Items
// ============================================================================

/// Menu entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Item {
    Answer {
        title: String,
        #[serde(rename = "answer")]
        text: String,
    },
    #[serde(rename = "module", alias = "tool")]
    Tool {
        title: String,
        #[serde(rename = "reference", alias = "target")]
        target: String,
    },
    Sequence {
        title: String,
        references: Vec<String>,
        #[serde(default, rename = "memory")]
        memory_scope: MemoryScope,
        #[serde(default = "default_go_back", rename = "goback")]
        go_back: bool,
    },
}

impl Item {
    pub fn title(&self) -> &str {
        match self {
            Item::Answer { title, .. } | Item::Tool { title, .. } | Item::Sequence { title, .. } => {
                title
            }
        }
    }

    /// Sequence module synthesized for an inline sequence item
    pub fn inline_sequence(&self) -> Option<SequenceModule> {
        match self {
            Item::Sequence {
                title,
                references,
                memory_scope,
                go_back,
            } => Some(SequenceModule {
                name: format!("sequence-{}", references.join("-")),
                description: title.clone(),
                references: references.clone(),
                memory_scope: *memory_scope,
                go_back: *go_back,
            }),
            _ => None,
        }
    }
}

// ============================================================================
// Data model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    #[serde(alias = "integer")]
    Int,
    #[serde(alias = "number")]
    Float,
    #[serde(alias = "boolean")]
    Bool,
    Enum,
    Date,
    Time,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::String => "string",
            PropertyType::Int => "int",
            PropertyType::Float => "float",
            PropertyType::Bool => "bool",
            PropertyType::Enum => "enum",
            PropertyType::Date => "date",
            PropertyType::Time => "time",
        };
        f.write_str(name)
    }
}

/// A value to collect from the user.
///
/// Accepts either the explicit form `{"name": "size", "type": "enum", ...}`
/// or the compact single-key form `{"size": "string"}` /
/// `{"size": {"type": "enum", "values": [...]}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawProperty")]
pub struct DataProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<EnumValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

impl DataProperty {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            required: true,
            values: Vec::new(),
            examples: Vec::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_values(mut self, values: Vec<EnumValue>) -> Self {
        self.values = values;
        self
    }
}

fn default_required() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawProperty {
    Explicit {
        name: String,
        #[serde(rename = "type")]
        property_type: PropertyType,
        #[serde(default = "default_required")]
        required: bool,
        #[serde(default)]
        values: Vec<EnumValue>,
        #[serde(default)]
        examples: Vec<String>,
    },
    Compact(BTreeMap<String, PropertyShape>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PropertyShape {
    Type(PropertyType),
    Detailed {
        #[serde(rename = "type")]
        property_type: PropertyType,
        #[serde(default = "default_required")]
        required: bool,
        #[serde(default)]
        values: Vec<EnumValue>,
        #[serde(default)]
        examples: Vec<String>,
    },
}

impl TryFrom<RawProperty> for DataProperty {
    type Error = String;

    fn try_from(raw: RawProperty) -> Result<Self, Self::Error> {
        let property = match raw {
            RawProperty::Explicit {
                name,
                property_type,
                required,
                values,
                examples,
            } => DataProperty {
                name,
                property_type,
                required,
                values,
                examples,
            },
            RawProperty::Compact(map) => {
                let mut entries = map.into_iter();
                let (Some((name, shape)), None) = (entries.next(), entries.next()) else {
                    return Err("compact data property must have exactly one key".to_string());
                };
                match shape {
                    PropertyShape::Type(property_type) => DataProperty::new(name, property_type),
                    PropertyShape::Detailed {
                        property_type,
                        required,
                        values,
                        examples,
                    } => DataProperty {
                        name,
                        property_type,
                        required,
                        values,
                        examples,
                    },
                }
            }
        };

        if property.property_type == PropertyType::Enum && property.values.is_empty() {
            return Err(format!("enum property '{}' declares no values", property.name));
        }
        Ok(property)
    }
}

/// Allowed value of an enum property, with optional synonyms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnumValue")]
pub struct EnumValue {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
}

impl EnumValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            synonyms: Vec::new(),
        }
    }

    pub fn with_synonyms(mut self, synonyms: &[&str]) -> Self {
        self.synonyms = synonyms.iter().map(ToString::to_string).collect();
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEnumValue {
    Name(String),
    Explicit {
        name: String,
        #[serde(default, alias = "examples")]
        synonyms: Vec<String>,
    },
    Compact(BTreeMap<String, Vec<String>>),
}

impl TryFrom<RawEnumValue> for EnumValue {
    type Error = String;

    fn try_from(raw: RawEnumValue) -> Result<Self, Self::Error> {
        match raw {
            RawEnumValue::Name(name) => Ok(EnumValue::new(name)),
            RawEnumValue::Explicit { name, synonyms } => Ok(EnumValue { name, synonyms }),
            RawEnumValue::Compact(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((name, synonyms)), None) => Ok(EnumValue { name, synonyms }),
                    _ => Err("compact enum value must have exactly one key".to_string()),
                }
            }
        }
    }
}

// ============================================================================
// Effects
// ============================================================================

/// What to do once a module has what it needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnSuccess {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<Execute>,
    #[serde(with = "response_form")]
    pub response: Response,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execute {
    pub language: String,
    pub code: String,
}

/// Response template plus the rephrase mode, as written in the document.
/// The mode is validated by the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rephrase: Option<String>,
}

impl Response {
    pub fn direct(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            rephrase: None,
        }
    }

    pub fn with_rephrase(mut self, mode: &str) -> Self {
        self.rephrase = Some(mode.to_string());
        self
    }

    /// Declared mode; `None` when the document names an unknown one
    pub fn mode(&self) -> Option<RephraseMode> {
        match self.rephrase.as_deref() {
            None => Some(RephraseMode::Direct),
            Some(mode) => RephraseMode::parse(mode),
        }
    }
}

/// How a finished module's result reaches the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RephraseMode {
    /// Said as rendered
    Direct,
    /// Paraphrased by the module's LLM, then said
    Simple,
    /// Handed back to the calling module, which answers in its own voice
    InCaller,
}

impl RephraseMode {
    pub fn parse(mode: &str) -> Option<Self> {
        match mode.trim().to_lowercase().as_str() {
            "direct" | "" => Some(RephraseMode::Direct),
            "simple" => Some(RephraseMode::Simple),
            "in-caller" | "in_caller" | "incaller" => Some(RephraseMode::InCaller),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RephraseMode::Direct => "direct",
            RephraseMode::Simple => "simple",
            RephraseMode::InCaller => "in-caller",
        }
    }
}

/// `response` may be written as a bare template string
mod response_form {
    use super::Response;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Form {
        Text(String),
        Full(Response),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Response, D::Error> {
        Ok(match Form::deserialize(deserializer)? {
            Form::Text(text) => Response::direct(text),
            Form::Full(response) => response,
        })
    }

    pub fn serialize<S: Serializer>(response: &Response, serializer: S) -> Result<S::Ok, S::Error> {
        response.serialize(serializer)
    }
}

// ============================================================================
// Chatbot model
// ============================================================================

/// Validated set of modules with a resolved entry module
#[derive(Debug, Clone, PartialEq)]
pub struct ChatbotModel {
    modules: Vec<ModuleSpec>,
    by_name: HashMap<String, usize>,
    entry: String,
}

impl ChatbotModel {
    /// Build a model, checking names, references, acyclicity and the entry.
    ///
    /// Without an explicit `entry` the unique module that nothing references
    /// is used.
    pub fn new(modules: Vec<ModuleSpec>, entry: Option<String>) -> Result<Self, SpecError> {
        if modules.is_empty() {
            return Err(SpecError::Empty);
        }

        let mut by_name = HashMap::with_capacity(modules.len());
        for (index, module) in modules.iter().enumerate() {
            if by_name.insert(module.name().to_string(), index).is_some() {
                return Err(SpecError::DuplicateModule(module.name().to_string()));
            }
        }

        for module in &modules {
            for reference in module.references() {
                if !by_name.contains_key(reference) {
                    return Err(SpecError::UnknownReference {
                        module: module.name().to_string(),
                        reference: reference.to_string(),
                    });
                }
            }
        }

        graph::check_acyclic(&modules, &by_name)?;

        let entry = match entry {
            Some(entry) if by_name.contains_key(&entry) => entry,
            Some(entry) => return Err(SpecError::UnknownEntry(entry)),
            None => graph::unique_root(&modules)?,
        };

        Ok(Self {
            modules,
            by_name,
            entry,
        })
    }

    pub fn modules(&self) -> &[ModuleSpec] {
        &self.modules
    }

    pub fn resolve(&self, name: &str) -> Option<&ModuleSpec> {
        self.by_name.get(name).map(|&index| &self.modules[index])
    }

    pub fn entry(&self) -> &ModuleSpec {
        // `entry` is checked against `by_name` on construction
        &self.modules[self.by_name[&self.entry]]
    }

    pub fn entry_name(&self) -> &str {
        &self.entry
    }
}
