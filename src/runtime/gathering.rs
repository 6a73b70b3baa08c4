//! Data extraction for data gathering modules, and effect execution
//!
//! A data gathering module is invoked as a tool with a JSON payload. Values
//! are coerced to their declared type, normalized by the registered
//! formatter, and checked against the required set.

use super::error::EngineError;
use super::evaluator::plain_text;
use super::execution::ExecutionState;
use super::parser::{keep_until_last_brace, strip_code_fence};
use super::services::Services;
use crate::llm::LlmError;
use crate::memory::{ConversationMemory, DataRecord, MemoryPiece, ScopeId};
use crate::spec::{DataGatheringModule, DataProperty, OnSuccess, PropertyType, RephraseMode};
use crate::state_machine::{Event, MemoryDelta};
use serde_json::Value;

/// Outcome of type coercion for one payload field
#[derive(Debug, Clone, PartialEq)]
enum Coerced {
    /// Absent, null or blank
    Missing,
    /// Present but not understood; carries the raw text
    Invalid(String),
    Value(Value),
}

/// Parse a tool payload into a record; anything but a JSON object is empty
pub fn parse_payload(payload: Option<&str>) -> DataRecord {
    let Some(payload) = payload else {
        return DataRecord::new();
    };
    let text = keep_until_last_brace(strip_code_fence(payload));
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(record)) => record,
        Ok(other) => {
            tracing::debug!(payload = %other, "Tool payload is not an object");
            DataRecord::new()
        }
        Err(e) => {
            tracing::debug!(payload = %payload, error = %e, "Tool payload is not JSON");
            DataRecord::new()
        }
    }
}

fn coerce(property_type: PropertyType, raw: &Value) -> Coerced {
    let text = match raw {
        Value::Null => return Coerced::Missing,
        Value::String(s) if s.trim().is_empty() => return Coerced::Missing,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };

    let value = match (property_type, raw) {
        (PropertyType::String, Value::String(_) | Value::Number(_) | Value::Bool(_)) => {
            Some(Value::String(text.clone()))
        }
        (PropertyType::Int, Value::Number(n)) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract().abs() < f64::EPSILON)
                    .and_then(|f| format!("{f:.0}").parse::<i64>().ok())
            })
            .map(Value::from),
        (PropertyType::Int, Value::String(_)) => text.parse::<i64>().ok().map(Value::from),
        (PropertyType::Float, Value::Number(n)) => n.as_f64().map(Value::from),
        (PropertyType::Float, Value::String(_)) => text.parse::<f64>().ok().map(Value::from),
        (PropertyType::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
        (PropertyType::Bool, Value::String(_)) => match text.to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "n" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        (
            PropertyType::Enum | PropertyType::Date | PropertyType::Time,
            Value::String(_) | Value::Number(_),
        ) => Some(Value::String(text.clone())),
        _ => None,
    };

    value.map_or(Coerced::Invalid(text), Coerced::Value)
}

/// Coerce and format one value; `Ok(None)` when it was not understood
async fn resolve_value(
    module: &str,
    property: &DataProperty,
    value: Value,
    services: &Services,
    state: &mut ExecutionState,
) -> Result<Option<Value>, LlmError> {
    let Some(formatter) = services.formatter(property.property_type) else {
        return Ok(Some(value));
    };

    let raw = plain_text(&value);
    let cache_key = format!("{module}.{}", property.name);
    if let Some(cached) = state.cached_format(&cache_key, &raw) {
        return Ok(cached.clone());
    }

    let formatted = formatter.format(&raw, property, services, module).await?;
    state.cache_format(&cache_key, &raw, formatted.clone());
    Ok(formatted)
}

/// `k = v` pairs, comma separated
pub fn describe(data: &DataRecord) -> String {
    data.iter()
        .map(|(k, v)| format!("{k} = {}", plain_text(v)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Substitute `{{name}}` and `{name}` placeholders
pub fn render_template(template: &str, data: &DataRecord) -> String {
    let mut out = template.to_string();
    for (name, value) in data {
        let value = plain_text(value);
        out = out
            .replace(&format!("{{{{{name}}}}}"), &value)
            .replace(&format!("{{{name}}}"), &value);
    }
    out
}

/// Run a module's effect and produce the text that reports it.
///
/// Without an effect descriptor the default response is used. With one,
/// the optional `execute` step runs first and its output is available to
/// the template as `result`.
pub async fn execute_action(
    module: &str,
    on_success: Option<&OnSuccess>,
    mut data: DataRecord,
    default_response: String,
    services: &Services,
) -> Result<String, EngineError> {
    let Some(action) = on_success else {
        return Ok(default_response);
    };

    if let Some(execute) = &action.execute {
        let result = services.evaluator().evaluate(execute, &data).await?;
        tracing::info!(module = %module, result = %result, "Effect executed");
        data.insert("result".to_string(), Value::String(result));
    }

    let text = render_template(&action.response.text, &data);
    match action.response.mode() {
        Some(RephraseMode::Simple) => Ok(services.rephrase(module, &text, None).await?),
        _ => Ok(text),
    }
}

/// Memory a finishing module hands to its caller
pub fn finish_memory(collected: Option<(String, DataRecord)>, result: &str) -> MemoryDelta {
    let mut memory = MemoryDelta::new();
    if let Some((text, data)) = collected {
        memory.insert(ScopeId::CollectedData, MemoryPiece::new().data(text, data));
    }
    memory.insert(
        ScopeId::Instruction,
        MemoryPiece::new().instruction(format!("Tell the user: {result}")),
    );
    memory
}

fn names<'a>(properties: impl Iterator<Item = &'a DataProperty>) -> String {
    properties
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extract the payload's values and either finish or ask for what is missing
pub async fn collect(
    module: &str,
    spec: &DataGatheringModule,
    payload: Option<&str>,
    services: &Services,
    state: &mut ExecutionState,
) -> Result<(), EngineError> {
    let record = parse_payload(payload);
    let mut data = DataRecord::new();
    let mut unknown = Vec::new();

    for property in &spec.data {
        let Some(raw) = record.get(&property.name) else {
            continue;
        };
        match coerce(property.property_type, raw) {
            Coerced::Missing => {}
            Coerced::Invalid(text) => unknown.push(text),
            Coerced::Value(value) => {
                let text = plain_text(&value);
                match resolve_value(module, property, value, services, state).await? {
                    Some(value) => {
                        data.insert(property.name.clone(), value);
                    }
                    None => unknown.push(text),
                }
            }
        }
    }

    let collected = describe(&data);
    let complete = spec
        .data
        .iter()
        .all(|p| !p.required || data.contains_key(&p.name));

    // Values forwarded from earlier steps stay in the data message, which
    // replaces the previous one
    let mut carried = state
        .memory()
        .bucket(module, ScopeId::CollectedData)
        .map(ConversationMemory::data)
        .unwrap_or_default();
    carried.retain(|name, _| !spec.data.iter().any(|p| &p.name == name));
    carried.extend(data.clone());

    if complete {
        tracing::info!(module = %module, data = %collected, "Data gathering complete");
        let default_response = format!("The following data has been collected: {collected}");
        let result = execute_action(
            module,
            spec.on_success.as_ref(),
            data.clone(),
            default_response,
            services,
        )
        .await?;

        state.set_side_data(module, data.clone());
        state.push_event(Event::TaskFinish {
            memory: finish_memory(Some((collected, carried)), &result),
            result: Some(result),
            data: Some(data),
        });
        return Ok(());
    }

    let missing = |required: bool| {
        names(
            spec.data
                .iter()
                .filter(|p| p.required == required && !data.contains_key(&p.name)),
        )
    };
    let mut instruction = format!(
        "Check in the previous conversation history, and if the data is not present, \
         ask the Human to provide the missing data: {}",
        missing(true)
    );
    let optional = missing(false);
    if !optional.is_empty() {
        instruction.push_str(&format!(
            "\nIf you have not asked for it before, tell the human that the following data is optional: {optional}"
        ));
    }
    if !unknown.is_empty() {
        instruction.push_str(&format!(
            "\nIn addition, tell the human that you could not understand: {}",
            unknown.join(",")
        ));
    }
    tracing::debug!(module = %module, missing = %missing(true), "Data gathering in progress");

    let mut memory = MemoryDelta::new();
    memory.insert(
        ScopeId::CollectedData,
        MemoryPiece::new().data(collected, carried),
    );
    memory.insert(ScopeId::Instruction, MemoryPiece::new().instruction(instruction));
    state.push_event(Event::TaskInProgress { memory });
    Ok(())
}
