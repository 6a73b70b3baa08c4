//! Vertex and transition arena with transition lookup

use super::action::Action;
use super::event::{Event, EventKind};
use crate::runtime::ModuleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(usize);

impl VertexId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Vertex {
    /// Pseudo-state where a machine starts
    Initial,
    /// Conversation position bound to a runtime module
    State { module: ModuleId },
    /// A state that is itself a machine, entered through `initial`
    Composite { module: ModuleId, initial: VertexId },
}

impl Vertex {
    pub fn module(&self) -> Option<ModuleId> {
        match self {
            Vertex::Initial => None,
            Vertex::State { module } | Vertex::Composite { module, .. } => Some(*module),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct VertexNode {
    vertex: Vertex,
    /// Composite this vertex was created in; `None` for the top level
    parent: Option<VertexId>,
}

/// What an event must look like for a transition to fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMatcher {
    Kind(EventKind),
    /// An activation targeting this specific module
    Activate(ModuleId),
}

impl EventMatcher {
    pub fn matches(&self, event: &Event) -> bool {
        match (self, event) {
            (EventMatcher::Activate(module), Event::ActivateModule { target, .. }) => {
                module == target
            }
            (EventMatcher::Activate(_), _) => false,
            (EventMatcher::Kind(kind), event) => event.kind() == *kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// `None` is an epsilon trigger: it fires only when no event is pending
    pub event: Option<EventMatcher>,
    pub action: Option<Action>,
}

impl Trigger {
    pub fn accepts(&self, event: Option<&Event>) -> bool {
        match (&self.event, event) {
            (None, None) => true,
            (Some(matcher), Some(event)) => matcher.matches(event),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub source: VertexId,
    pub target: VertexId,
    pub trigger: Trigger,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateMachine {
    vertices: Vec<VertexNode>,
    transitions: Vec<Transition>,
    initial: VertexId,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            vertices: vec![VertexNode {
                vertex: Vertex::Initial,
                parent: None,
            }],
            transitions: Vec::new(),
            initial: VertexId(0),
        }
    }

    /// Top-level initial pseudo-state
    pub fn initial(&self) -> VertexId {
        self.initial
    }

    fn push(&mut self, vertex: Vertex, parent: Option<VertexId>) -> VertexId {
        let id = VertexId(self.vertices.len());
        self.vertices.push(VertexNode { vertex, parent });
        id
    }

    pub fn add_state(&mut self, module: ModuleId, parent: Option<VertexId>) -> VertexId {
        self.push(Vertex::State { module }, parent)
    }

    /// Add a composite state together with its nested initial pseudo-state
    pub fn add_composite(&mut self, module: ModuleId, parent: Option<VertexId>) -> VertexId {
        let id = VertexId(self.vertices.len());
        let initial = VertexId(id.0 + 1);
        self.vertices.push(VertexNode {
            vertex: Vertex::Composite { module, initial },
            parent,
        });
        self.vertices.push(VertexNode {
            vertex: Vertex::Initial,
            parent: Some(id),
        });
        id
    }

    pub fn add_transition(
        &mut self,
        source: VertexId,
        target: VertexId,
        event: Option<EventMatcher>,
        action: Option<Action>,
    ) {
        self.transitions.push(Transition {
            source,
            target,
            trigger: Trigger { event, action },
        });
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.0].vertex
    }

    /// Initial pseudo-state of a composite vertex
    pub fn nested_initial(&self, id: VertexId) -> Option<VertexId> {
        match self.vertex(id) {
            Vertex::Composite { initial, .. } => Some(*initial),
            _ => None,
        }
    }

    pub fn parent(&self, id: VertexId) -> Option<VertexId> {
        self.vertices[id.0].parent
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        (0..self.vertices.len()).map(VertexId)
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Transition that fires from `current` for `event`.
    ///
    /// From a composite the nested machine is consulted first, starting at
    /// its initial pseudo-state; otherwise the first transition leaving
    /// `current` whose trigger accepts the event wins.
    pub fn transition_for(&self, current: VertexId, event: Option<&Event>) -> Option<&Transition> {
        if let Vertex::Composite { initial, .. } = self.vertex(current) {
            if let Some(transition) = self.first_accepting(*initial, event) {
                return Some(transition);
            }
        }
        self.first_accepting(current, event)
    }

    fn first_accepting(&self, source: VertexId, event: Option<&Event>) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| t.source == source && t.trigger.accepts(event))
    }
}
