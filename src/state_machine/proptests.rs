//! Property-based tests for the state machine
//!
//! These tests verify dispatch invariants hold across arbitrary machines and
//! event sequences.

use super::*;
use crate::memory::MemoryPiece;
use crate::runtime::testing::CapturingChannel;
use crate::runtime::{ExecutionState, ModuleId};
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_module() -> impl Strategy<Value = ModuleId> {
    (0usize..4).prop_map(ModuleId::from_index)
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        "[a-z ]{0,12}".prop_map(Event::user_input),
        (arb_module(), proptest::option::of("[a-z{}]{0,8}")).prop_map(|(target, input)| {
            Event::ActivateModule {
                target,
                input,
                previous_answer: MemoryPiece::new(),
            }
        }),
        "[a-z ]{0,12}".prop_map(|text| Event::AiResponse { text }),
        Just(Event::TaskInProgress {
            memory: MemoryDelta::new()
        }),
        proptest::option::of("[a-z ]{0,12}").prop_map(Event::finish),
        "[a-z ]{0,12}".prop_map(|message| Event::LlmUnavailable { message }),
    ]
}

fn arb_kind() -> impl Strategy<Value = EventKind> {
    prop_oneof![
        Just(EventKind::UserInput),
        Just(EventKind::ActivateModule),
        Just(EventKind::AiResponse),
        Just(EventKind::TaskInProgress),
        Just(EventKind::TaskFinish),
        Just(EventKind::LlmUnavailable),
    ]
}

fn arb_matcher() -> impl Strategy<Value = Option<EventMatcher>> {
    prop_oneof![
        Just(None),
        arb_kind().prop_map(|kind| Some(EventMatcher::Kind(kind))),
        arb_module().prop_map(|module| Some(EventMatcher::Activate(module))),
    ]
}

/// Flat machine: states 1..=n plus random transitions between them
fn arb_machine() -> impl Strategy<Value = StateMachine> {
    (2usize..6).prop_flat_map(|states| {
        prop::collection::vec((0..=states, 1..=states, arb_matcher()), 0..20).prop_map(
            move |edges| {
                let mut machine = StateMachine::new();
                let ids: Vec<VertexId> = (0..states)
                    .map(|i| machine.add_state(ModuleId::from_index(i), None))
                    .collect();
                let vertex = |i: usize| if i == 0 { machine.initial() } else { ids[i - 1] };
                let edges: Vec<_> = edges
                    .into_iter()
                    .map(|(source, target, matcher)| (vertex(source), vertex(target), matcher))
                    .collect();
                for (source, target, matcher) in edges {
                    machine.add_transition(source, target, matcher, None);
                }
                machine
            },
        )
    })
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Dispatch picks the first declared transition whose trigger accepts
    #[test]
    fn prop_first_accepting_transition_wins(
        machine in arb_machine(),
        event in proptest::option::of(arb_event()),
    ) {
        for current in machine.vertex_ids() {
            let expected = machine
                .transitions()
                .iter()
                .find(|t| t.source == current && t.trigger.accepts(event.as_ref()));
            prop_assert_eq!(machine.transition_for(current, event.as_ref()), expected);
        }
    }

    /// Epsilon transitions fire exactly when no event is pending
    #[test]
    fn prop_epsilon_only_without_event(
        machine in arb_machine(),
        event in proptest::option::of(arb_event()),
    ) {
        for current in machine.vertex_ids() {
            if let Some(transition) = machine.transition_for(current, event.as_ref()) {
                prop_assert_eq!(transition.trigger.event.is_none(), event.is_none());
            }
        }
    }

    /// Activation matchers only accept activations of their own module
    #[test]
    fn prop_activate_matcher_checks_target(module in arb_module(), event in arb_event()) {
        let accepted = EventMatcher::Activate(module).matches(&event);
        let targets_module = matches!(
            &event,
            Event::ActivateModule { target, .. } if *target == module
        );
        prop_assert_eq!(accepted, targets_module);
    }

    /// Events come back most recent first
    #[test]
    fn prop_event_stack_is_lifo(events in prop::collection::vec(arb_event(), 0..10)) {
        let mut state = ExecutionState::for_tests(Box::new(CapturingChannel::new()));
        for event in &events {
            state.push_event(event.clone());
        }
        let mut popped = Vec::new();
        while let Some(event) = state.pop_event() {
            popped.push(event);
        }
        popped.reverse();
        prop_assert_eq!(popped, events);
    }
}
