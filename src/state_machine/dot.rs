//! Graphviz rendering of a compiled state machine

use super::action::{Action, SayMessage};
use super::machine::{EventMatcher, StateMachine, Vertex, VertexId};
use crate::runtime::ModuleArena;
use std::fmt::Write;

/// Render the machine as a `dot` digraph; composites become clusters
pub fn to_dot(machine: &StateMachine, modules: &ModuleArena) -> String {
    let mut out = String::from("digraph chatbot {\n  rankdir=LR;\n  node [shape=box, style=rounded];\n");
    write_vertices(&mut out, machine, modules, None, 1);

    for transition in machine.transitions() {
        let event = match transition.trigger.event {
            None => "ε".to_string(),
            Some(EventMatcher::Kind(kind)) => kind.to_string(),
            Some(EventMatcher::Activate(module)) => format!("Activate({})", modules.name(module)),
        };
        let label = match &transition.trigger.action {
            Some(action) => format!("{event} / {}", describe_action(action, modules)),
            None => event,
        };
        let _ = writeln!(
            out,
            "  v{} -> v{} [label=\"{}\"];",
            transition.source.index(),
            transition.target.index(),
            escape(&label)
        );
    }

    out.push_str("}\n");
    out
}

fn write_vertices(
    out: &mut String,
    machine: &StateMachine,
    modules: &ModuleArena,
    parent: Option<VertexId>,
    depth: usize,
) {
    let indent = "  ".repeat(depth);
    for id in machine.vertex_ids().filter(|&id| machine.parent(id) == parent) {
        match machine.vertex(id) {
            Vertex::Initial => {
                let _ = writeln!(out, "{indent}v{} [shape=point];", id.index());
            }
            Vertex::State { module } => {
                let _ = writeln!(
                    out,
                    "{indent}v{} [label=\"{}\"];",
                    id.index(),
                    escape(modules.name(*module))
                );
            }
            Vertex::Composite { module, .. } => {
                let name = escape(modules.name(*module));
                let _ = writeln!(out, "{indent}subgraph cluster_{} {{", id.index());
                let _ = writeln!(out, "{indent}  label=\"{name}\";");
                let _ = writeln!(out, "{indent}  v{} [label=\"{name}\", shape=doublecircle];", id.index());
                write_vertices(out, machine, modules, Some(id), depth + 1);
                let _ = writeln!(out, "{indent}}}");
            }
        }
    }
}

/// Short label of an action, naming the modules it touches
pub fn describe_action(action: &Action, modules: &ModuleArena) -> String {
    match action {
        Action::Say(SayMessage::Text(_)) => "Say".to_string(),
        Action::Say(SayMessage::FromEvent) => "Say(event)".to_string(),
        Action::RunModule { module, .. } => format!("Run({})", modules.name(*module)),
        Action::ApplyLlm { module, .. } => format!("ApplyLLM({})", modules.name(*module)),
        Action::RunTool { module } => format!("RunTool({})", modules.name(*module)),
        Action::UpdateMemory { module } => format!("UpdateMemory({})", modules.name(*module)),
        Action::CopyMemory { from, to, .. } => {
            format!("CopyMemory({} -> {})", modules.name(*from), modules.name(*to))
        }
        Action::PushEvent(event) => format!("Push({})", event.kind()),
        Action::Composite(actions) => actions
            .iter()
            .map(|a| describe_action(a, modules))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
