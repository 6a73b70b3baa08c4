//! Property-based tests for the reasoning-format parser

use super::*;
use proptest::prelude::*;

fn arb_payload() -> impl Strategy<Value = String> {
    prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9 ]{0,10}", 0..4).prop_map(|fields| {
        serde_json::to_string(&fields).unwrap_or_else(|_| "{}".to_string())
    })
}

proptest! {
    /// Any completion parses to something, and never to a tool call when
    /// tools are disabled
    #[test]
    fn prop_parser_never_fails(text in "\\PC{0,200}") {
        let _ = parse_output(&text, true);
        let parsed = parse_output(&text, false);
        let is_answer = matches!(parsed, ParsedOutput::Answer(_));
        prop_assert!(is_answer);
    }

    /// Text after the AI prefix is the answer
    #[test]
    fn prop_ai_prefix_answer(answer in "[a-zA-Z0-9 .,!?]{1,80}") {
        let text = format!("{NO_TOOL_MARKER}\n{AI_PREFIX}: {answer}");
        prop_assert_eq!(
            parse_output(&text, true),
            ParsedOutput::Answer(answer.trim().to_string())
        );
    }

    /// Tool name and payload survive the reasoning format
    #[test]
    fn prop_tool_call_round_trip(tool in "[a-z][a-z-]{0,15}", payload in arb_payload()) {
        let text = format!(
            "Thought: Do I need to use a tool? Yes\nAction: {tool}\nAction Input: {payload}"
        );
        match parse_output(&text, true) {
            ParsedOutput::ToolCall { tool: parsed_tool, input, log } => {
                prop_assert_eq!(parsed_tool, tool);
                prop_assert_eq!(input, payload);
                prop_assert_eq!(log, text);
            }
            ParsedOutput::Answer(answer) => {
                prop_assert!(false, "expected a tool call, got answer {:?}", answer);
            }
        }
    }

    /// Trimming after the last brace keeps a prefix ending in the brace
    #[test]
    fn prop_keep_until_last_brace(text in "\\PC{0,80}") {
        let kept = keep_until_last_brace(&text);
        prop_assert!(text.starts_with(kept));
        prop_assert!(kept == text || kept.ends_with('}'), "kept {:?}", kept);
    }
}
