//! Hierarchical state machine driving a conversation
//!
//! Vertices live in one arena; composite vertices own a nested initial
//! pseudo-state and the vertices created inside them. Transitions carry an
//! optional event matcher (none means an epsilon transition) and an action.

mod action;
mod dot;
mod event;
mod machine;

#[cfg(test)]
mod proptests;

pub use action::{Action, ActionContext, SayMessage};
pub use dot::{describe_action, to_dot};
pub use event::{Event, EventKind, MemoryDelta};
pub use machine::{EventMatcher, StateMachine, Transition, Trigger, Vertex, VertexId};
