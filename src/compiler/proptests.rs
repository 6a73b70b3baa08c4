//! Property-based tests for the compiler

use super::fixtures::{answer, form, menu, sequence, tool};
use super::*;
use crate::spec::{DataProperty, PropertyType};
use proptest::prelude::*;

fn arb_property_type() -> impl Strategy<Value = PropertyType> {
    prop_oneof![
        Just(PropertyType::String),
        Just(PropertyType::Int),
        Just(PropertyType::Float),
        Just(PropertyType::Bool),
        Just(PropertyType::Date),
        Just(PropertyType::Time),
    ]
}

/// A menu with answers, forms and optionally a sequence over the forms
fn arb_model() -> impl Strategy<Value = ChatbotModel> {
    (
        prop::collection::vec("[a-z]{3,8}", 0..4),
        prop::collection::vec(prop::collection::vec(arb_property_type(), 1..4), 1..5),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(answers, forms, with_sequence, full_memory)| {
            let mut items: Vec<Item> = answers
                .iter()
                .enumerate()
                .map(|(i, text)| answer(&format!("Answer {i}"), text))
                .collect();
            let mut modules = Vec::new();
            let names: Vec<String> = (0..forms.len()).map(|i| format!("form{i}")).collect();

            for (name, types) in names.iter().zip(&forms) {
                items.push(tool(&format!("Use {name}"), name));
                let data = types
                    .iter()
                    .enumerate()
                    .map(|(i, t)| DataProperty::new(format!("field{i}"), *t))
                    .collect();
                modules.push(form(name, data, None));
            }

            if with_sequence {
                let steps: Vec<&str> = names.iter().map(String::as_str).collect();
                let scope = if full_memory {
                    MemoryScope::Full
                } else {
                    MemoryScope::Individual
                };
                modules.push(sequence("all-forms", &steps, scope));
                items.push(tool("Everything", "all-forms"));
            }

            modules.push(menu("top", items));
            ChatbotModel::new(modules, Some("top".to_string())).unwrap()
        })
}

proptest! {
    /// The same model always compiles to the same machine and modules
    #[test]
    fn prop_compilation_is_deterministic(model in arb_model()) {
        let configuration = Configuration::default();
        let first = compile(&model, &configuration).unwrap();
        let second = compile(&model, &configuration).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.to_dot(), second.to_dot());
    }

    /// Every activation edge targets a module that exists in the arena, and
    /// transitions stay inside one container except when leaving a composite
    #[test]
    fn prop_edges_are_well_formed(model in arb_model()) {
        let chatbot = compile(&model, &Configuration::default()).unwrap();
        let machine = chatbot.machine();
        for transition in machine.transitions() {
            if let Some(EventMatcher::Activate(target)) = transition.trigger.event {
                prop_assert!(target.index() < chatbot.modules().len());
            }
            let source_parent = machine.parent(transition.source);
            let exits_composite = Some(transition.target) == source_parent;
            prop_assert!(exits_composite || source_parent == machine.parent(transition.target));
        }
    }
}
