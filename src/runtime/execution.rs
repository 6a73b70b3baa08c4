//! Per-conversation mutable state

use super::traits::{ActionListener, Channel};
use crate::memory::{DataRecord, MemoryStore};
use crate::state_machine::{Action, Event, VertexId};
use serde_json::Value;
use std::collections::HashMap;

/// Everything that changes while a conversation runs: the current vertex,
/// the pending event stack, memory, side data and the output channel.
pub struct ExecutionState {
    current: VertexId,
    events: Vec<Event>,
    memory: MemoryStore,
    side_data: HashMap<String, DataRecord>,
    format_cache: HashMap<(String, String), Option<Value>>,
    channel: Box<dyn Channel>,
    listeners: Vec<Box<dyn ActionListener>>,
}

impl ExecutionState {
    pub fn new(initial: VertexId, channel: Box<dyn Channel>) -> Self {
        Self {
            current: initial,
            events: Vec::new(),
            memory: MemoryStore::new(),
            side_data: HashMap::new(),
            format_cache: HashMap::new(),
            channel,
            listeners: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn for_tests(channel: Box<dyn Channel>) -> Self {
        Self::new(crate::state_machine::StateMachine::new().initial(), channel)
    }

    pub fn current(&self) -> VertexId {
        self.current
    }

    pub fn set_current(&mut self, vertex: VertexId) {
        self.current = vertex;
    }

    // ========================================================================
    // Event stack
    // ========================================================================

    pub fn push_event(&mut self, event: Event) {
        tracing::debug!(event = %event.kind(), "Event pushed");
        self.events.push(event);
    }

    /// Most recently pushed event
    pub fn pop_event(&mut self) -> Option<Event> {
        self.events.pop()
    }

    pub fn pending_events(&self) -> &[Event] {
        &self.events
    }

    /// Drop all pending events, returning how many there were
    pub fn clear_events(&mut self) -> usize {
        let dropped = self.events.len();
        self.events.clear();
        dropped
    }

    // ========================================================================
    // Memory and data
    // ========================================================================

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryStore {
        &mut self.memory
    }

    /// Data a module completed with, for later modules to consume
    pub fn side_data(&self, module: &str) -> Option<&DataRecord> {
        self.side_data.get(module)
    }

    pub fn set_side_data(&mut self, module: &str, data: DataRecord) {
        self.side_data.insert(module.to_string(), data);
    }

    /// First value recorded for `property` by any module
    pub fn find_side_value(&self, property: &str) -> Option<&Value> {
        let mut modules: Vec<&String> = self.side_data.keys().collect();
        modules.sort();
        modules
            .into_iter()
            .find_map(|module| self.side_data[module].get(property))
    }

    pub fn cached_format(&self, property: &str, raw: &str) -> Option<&Option<Value>> {
        self.format_cache
            .get(&(property.to_string(), raw.to_string()))
    }

    pub fn cache_format(&mut self, property: &str, raw: &str, value: Option<Value>) {
        self.format_cache
            .insert((property.to_string(), raw.to_string()), value);
    }

    // ========================================================================
    // Output and observers
    // ========================================================================

    pub fn output(&mut self, message: &str, who: &str) {
        tracing::debug!(who = %who, message = %message, "Chatbot output");
        self.channel.output(message, who);
    }

    pub fn thinking(&mut self) {
        self.channel.thinking();
    }

    pub fn stop_thinking(&mut self) {
        self.channel.stop_thinking();
    }

    pub fn add_listener(&mut self, listener: Box<dyn ActionListener>) {
        self.listeners.push(listener);
    }

    pub fn notify_listeners(&mut self, action: &Action, event: Option<&Event>) {
        for listener in &mut self.listeners {
            listener.on_action(action, event);
        }
    }
}
