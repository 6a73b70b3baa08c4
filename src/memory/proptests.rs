//! Property-based tests for memory buckets

use super::*;
use proptest::prelude::*;

fn message(stamp: u64, kind: MessageKind, text: &str) -> Message {
    Message {
        stamp,
        at: Utc::now(),
        kind,
        text: text.to_string(),
        data: None,
    }
}

fn arb_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Human),
        Just(MessageKind::AiResponse),
        Just(MessageKind::AiReasoning),
        Just(MessageKind::Instruction),
        Just(MessageKind::Data),
    ]
}

proptest! {
    /// Conversational messages stay sorted with unique stamps, whatever the
    /// insertion order
    #[test]
    fn prop_history_sorted_and_deduplicated(
        stamps in prop::collection::vec(0u64..50, 0..40),
        human in prop::collection::vec(any::<bool>(), 40),
    ) {
        let mut bucket = ConversationMemory::default();
        for (i, &stamp) in stamps.iter().enumerate() {
            let kind = if human[i] { MessageKind::Human } else { MessageKind::AiResponse };
            bucket.insert(message(stamp, kind, "x"));
        }

        let stored: Vec<u64> = bucket.messages().iter().map(|m| m.stamp).collect();
        let mut expected = stamps.clone();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(stored, expected);
    }

    /// At most one instruction survives, and it is the last one inserted
    #[test]
    fn prop_instruction_latest_wins(
        kinds in prop::collection::vec(arb_kind(), 1..30),
    ) {
        let mut bucket = ConversationMemory::default();
        let mut last_instruction = None;
        for (i, kind) in kinds.iter().enumerate() {
            let text = format!("m{i}");
            if *kind == MessageKind::Instruction {
                last_instruction = Some(text.clone());
            }
            bucket.insert(message(i as u64, *kind, &text));
        }

        let instructions: Vec<&Message> = bucket
            .messages()
            .iter()
            .filter(|m| m.kind == MessageKind::Instruction)
            .collect();
        prop_assert!(instructions.len() <= 1);
        prop_assert_eq!(instructions.first().map(|m| m.text.clone()), last_instruction);
    }

    /// Copying the same source twice leaves the target as after one copy
    #[test]
    fn prop_copy_idempotent(
        texts in prop::collection::vec("[a-z]{1,8}", 0..10),
    ) {
        let mut store = MemoryStore::new();
        for text in &texts {
            store.add("source", ScopeId::History, &MemoryPiece::new().human(text.clone()));
        }

        store.copy("source", "target", ScopeId::History, None);
        let once = store.bucket("target", ScopeId::History).cloned();
        store.copy("source", "target", ScopeId::History, None);
        let twice = store.bucket("target", ScopeId::History).cloned();
        prop_assert_eq!(once, twice);
    }
}
