//! Prompt texts generated for each module kind

use crate::runtime::ModulePrompts;
use crate::spec::{
    DataGatheringModule, DataProperty, Item, MenuModule, OpenEndedModule, PropertyType,
    QuestionAnsweringModule, SequenceModule,
};
use std::fmt::Write;

fn item_handling(item: &Item) -> String {
    match item {
        Item::Answer { text, .. } => format!("You have to answer \"{text}\""),
        Item::Tool { target, .. } => format!("You have to use the tool \"{target}\""),
        Item::Sequence { .. } => {
            let name = item.inline_sequence().map(|s| s.name).unwrap_or_default();
            format!("You have to use the tool \"{name}\"")
        }
    }
}

fn task_list(header: &str, items: &[Item]) -> String {
    let lines: Vec<String> = items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}: {}. {}", i + 1, item.title(), item_handling(item)))
        .collect();
    format!("{header}{}", lines.join("\n"))
}

pub fn menu(module: &MenuModule, languages_prompt: &str) -> ModulePrompts {
    let options = task_list(
        "\nTASKS:\nYou are able to assist ONLY in these tasks:\n",
        &module.items,
    );
    let fallback = module.fallback.as_deref().map_or(String::new(), |fallback| {
        format!(
            "\nFallback:\nFor any request not related exactly to one of the tasks in list above, you MUST answer: {fallback}"
        )
    });

    ModulePrompts {
        presentation: format!("{}\n{languages_prompt}\n", module.presentation),
        task: format!("{options}\n{fallback}"),
        activation: Some(module.presentation.clone()),
    }
}

pub fn open_ended(module: &OpenEndedModule, languages_prompt: &str) -> ModulePrompts {
    let task = if module.items.is_empty() {
        String::new()
    } else {
        task_list(
            "\nBesides talking freely with the user, you can help with these tasks:\n",
            &module.items,
        )
    };
    ModulePrompts {
        presentation: format!("{}\n{languages_prompt}\n", module.presentation),
        task,
        activation: Some(module.presentation.clone()),
    }
}

fn data_shape(properties: &[DataProperty]) -> String {
    let mut shape = String::new();
    for p in properties {
        let optional = if p.required { "" } else { " is optional and" };
        if p.property_type == PropertyType::Enum {
            let values: Vec<&str> = p.values.iter().map(|v| v.name.as_str()).collect();
            let _ = writeln!(
                shape,
                "- '{}' which{optional} can be one of the following values: {}, do not accept any other value",
                p.name,
                values.join(", ")
            );
        } else {
            let _ = writeln!(
                shape,
                "- '{}' which{optional} is of type {}",
                p.name, p.property_type
            );
        }
    }
    shape
}

pub fn data_gathering(module: &DataGatheringModule, entry_presentation: &str) -> ModulePrompts {
    let names = module
        .data
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let shape = data_shape(&module.data);

    let activation = format!(
        "{}\nThe tool needs the following data:\n{shape}\
         \nProvide the values as JSON with the following fields: {names}.\n\
         \nOnly provide the values for {names} if given by the user. If no value is given, ask again.\n",
        module.description
    );
    let task = format!(
        "Your task is collecting the following data from the user:\n{shape}\n\
         Pass this information to the corresponding tool.\n\
         If there is missing data, ask for it politely.\n\n"
    );

    ModulePrompts {
        presentation: entry_presentation.to_string(),
        task,
        activation: Some(activation),
    }
}

pub fn question_answering(
    module: &QuestionAnsweringModule,
    entry_presentation: &str,
) -> ModulePrompts {
    let questions: Vec<String> = module
        .questions
        .iter()
        .map(|qa| format!("- Question: {}", qa.question))
        .collect();
    let activation = format!(
        "{}\nThe tool is able to answer the following questions:\n{}\n\
         \nProvide the question given by the user using the JSON format \"question\": <question>\".\n",
        module.description,
        questions.join("\n")
    );

    let pairs: Vec<String> = module
        .questions
        .iter()
        .map(|qa| format!("- Question: {}\n  Answer: {}\n", qa.question, qa.answer))
        .collect();
    let task = format!(
        "The following is the list of question/answer pairs that you are allowed to answer:\n{}\
         \nOnly provide an answer if the question is in the list.\n",
        pairs.join("\n")
    );

    ModulePrompts {
        presentation: entry_presentation.to_string(),
        task,
        activation: Some(activation),
    }
}

pub fn sequence(module: &SequenceModule, entry_presentation: &str) -> ModulePrompts {
    ModulePrompts {
        presentation: entry_presentation.to_string(),
        task: String::new(),
        activation: Some(module.description.clone()),
    }
}

/// Actions are never offered to an LLM as tools
pub fn action(entry_presentation: &str) -> ModulePrompts {
    ModulePrompts {
        presentation: entry_presentation.to_string(),
        task: String::new(),
        activation: None,
    }
}
