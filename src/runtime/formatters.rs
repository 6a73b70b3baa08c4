//! Built-in value formatters, keyed by property type

use super::services::Services;
use super::traits::ValueFormatter;
use crate::llm::{LlmError, LlmRequest, PromptTurn};
use crate::spec::{DataProperty, EnumValue, PropertyType};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

pub const NO_MATCH: &str = "NO_MATCH";

const DATE_OUTPUT: &str = "%d/%m/%Y";
const TIME_OUTPUT: &str = "%H:%M";
const DATETIME_INPUTS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

#[derive(Clone)]
pub struct FormatterRegistry {
    formatters: HashMap<PropertyType, Arc<dyn ValueFormatter>>,
}

impl FormatterRegistry {
    pub fn empty() -> Self {
        Self {
            formatters: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(PropertyType::Date, Arc::new(DateFormatter));
        registry.register(PropertyType::Time, Arc::new(TimeFormatter));
        registry.register(PropertyType::Enum, Arc::new(EnumFormatter));
        registry
    }

    pub fn register(&mut self, property_type: PropertyType, formatter: Arc<dyn ValueFormatter>) {
        self.formatters.insert(property_type, formatter);
    }

    pub fn get(&self, property_type: PropertyType) -> Option<Arc<dyn ValueFormatter>> {
        self.formatters.get(&property_type).cloned()
    }
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    DATETIME_INPUTS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

/// ISO dates and datetimes, or `dd/mm/YYYY`, as `dd/mm/YYYY`
pub struct DateFormatter;

impl DateFormatter {
    pub fn normalize(raw: &str) -> Option<String> {
        let raw = raw.trim();
        let date = parse_datetime(raw)
            .map(|dt| dt.date())
            .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
            .or_else(|| NaiveDate::parse_from_str(raw, DATE_OUTPUT).ok())?;
        Some(date.format(DATE_OUTPUT).to_string())
    }
}

#[async_trait]
impl ValueFormatter for DateFormatter {
    async fn format(
        &self,
        raw: &str,
        _property: &DataProperty,
        _services: &Services,
        _module: &str,
    ) -> Result<Option<Value>, LlmError> {
        Ok(Self::normalize(raw).map(Value::String))
    }
}

/// ISO datetimes or `HH:MM[:SS]` as `HH:MM`
pub struct TimeFormatter;

impl TimeFormatter {
    pub fn normalize(raw: &str) -> Option<String> {
        let raw = raw.trim();
        let time = parse_datetime(raw)
            .map(|dt| dt.time())
            .or_else(|| NaiveTime::parse_from_str(raw, "%H:%M:%S").ok())
            .or_else(|| NaiveTime::parse_from_str(raw, TIME_OUTPUT).ok())?;
        Some(time.format(TIME_OUTPUT).to_string())
    }
}

#[async_trait]
impl ValueFormatter for TimeFormatter {
    async fn format(
        &self,
        raw: &str,
        _property: &DataProperty,
        _services: &Services,
        _module: &str,
    ) -> Result<Option<Value>, LlmError> {
        Ok(Self::normalize(raw).map(Value::String))
    }
}

/// Resolves a value against the declared enum values: by name, then by
/// synonym, then by asking the LLM to pick one of the declared values.
pub struct EnumFormatter;

impl EnumFormatter {
    /// Case-insensitive name or synonym match, without the LLM
    pub fn lookup<'a>(raw: &str, values: &'a [EnumValue]) -> Option<&'a EnumValue> {
        let raw = raw.trim();
        values
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(raw))
            .or_else(|| {
                values
                    .iter()
                    .find(|v| v.synonyms.iter().any(|s| s.eq_ignore_ascii_case(raw)))
            })
    }

    fn lookup_request(raw: &str, property: &DataProperty) -> LlmRequest {
        let mut prompt = format!(
            "The property '{}' accepts only the following values:\n",
            property.name
        );
        for value in &property.values {
            if value.synonyms.is_empty() {
                let _ = writeln!(prompt, "- {}", value.name);
            } else {
                let _ = writeln!(prompt, "- {} (also: {})", value.name, value.synonyms.join(", "));
            }
        }
        let _ = write!(
            prompt,
            "\nWhich of these values does \"{raw}\" refer to? \
             Answer only with the value, or {NO_MATCH} if it refers to none of them."
        );
        LlmRequest::new(vec![PromptTurn::human(prompt)])
    }
}

#[async_trait]
impl ValueFormatter for EnumFormatter {
    async fn format(
        &self,
        raw: &str,
        property: &DataProperty,
        services: &Services,
        module: &str,
    ) -> Result<Option<Value>, LlmError> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        if let Some(value) = Self::lookup(raw, &property.values) {
            return Ok(Some(Value::String(value.name.clone())));
        }

        let answer = services
            .invoke(module, &Self::lookup_request(raw, property))
            .await?;
        let answer = answer.trim().trim_matches(|c| c == '"' || c == '\'' || c == '.');
        if answer.eq_ignore_ascii_case(NO_MATCH) {
            tracing::debug!(property = %property.name, raw = %raw, "Enum value not matched");
            return Ok(None);
        }

        // Only declared names are accepted, whatever the model says
        Ok(property
            .values
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(answer))
            .map(|v| Value::String(v.name.clone())))
    }
}
