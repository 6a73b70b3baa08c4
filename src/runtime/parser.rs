//! Parsing of the LLM's reasoning format
//!
//! The model either calls a tool:
//!
//! ```text
//! Thought: Do I need to use a tool? Yes
//! Action: order-pizza
//! Action Input: {"size": "small"}
//! ```
//!
//! or answers after an `AI:` prefix (or the "No" thought line).

#[cfg(test)]
mod proptests;

use regex::Regex;
use std::sync::LazyLock;

pub const AI_PREFIX: &str = "AI";
pub const NO_TOOL_MARKER: &str = "Thought: Do I need to use a tool? No";

static ACTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Action: (.*?)[\n]*Action Input: (.*)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedOutput {
    ToolCall {
        tool: String,
        input: String,
        /// Full model output, kept as reasoning
        log: String,
    },
    Answer(String),
}

/// Parse a completion. Output that matches neither form is taken as the
/// answer verbatim; tool calls are ignored when tools are not allowed.
pub fn parse_output(text: &str, allow_tools: bool) -> ParsedOutput {
    let ai_marker = format!("{AI_PREFIX}:");
    if let Some((_, answer)) = text.rsplit_once(&ai_marker) {
        return ParsedOutput::Answer(answer.trim().to_string());
    }

    if let Some((_, answer)) = text.rsplit_once(NO_TOOL_MARKER) {
        return ParsedOutput::Answer(answer.trim().to_string());
    }

    if allow_tools {
        if let Some(captures) = ACTION_PATTERN.captures(text) {
            let tool = captures[1].trim().to_string();
            let input = captures[2].trim_matches(' ').trim_matches('"').to_string();
            return ParsedOutput::ToolCall {
                tool,
                input,
                log: text.to_string(),
            };
        }
    }

    tracing::warn!(output = %text, "Could not parse LLM output, using it as the answer");
    ParsedOutput::Answer(text.trim().to_string())
}

/// Drop anything after the last closing brace (trailing fences, chatter)
pub fn keep_until_last_brace(text: &str) -> &str {
    match text.rfind('}') {
        Some(index) => text.split_at(index + 1).0,
        None => text,
    }
}

/// Strip a leading fenced-code marker such as "```json"
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => rest
            .split_once('\n')
            .map_or(rest, |(_, body)| body)
            .trim_end_matches("```")
            .trim(),
        None => trimmed,
    }
}
