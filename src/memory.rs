//! Scoped conversation memory
//!
//! Every module owns a few named buckets ([`ScopeId`]) of timestamped
//! messages. Buckets stay ordered by logical timestamp, collapse equal
//! timestamps, and keep only the latest instruction and data message.

#[cfg(test)]
mod proptests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Structured values collected from the user, keyed by property name
pub type DataRecord = Map<String, Value>;

/// Memory bucket name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeId {
    History,
    CollectedData,
    Instruction,
}

impl ScopeId {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeId::History => "history",
            ScopeId::CollectedData => "collected-data",
            ScopeId::Instruction => "instruction",
        }
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Human,
    AiResponse,
    AiReasoning,
    Instruction,
    Data,
}

impl MessageKind {
    /// Prefix used when the message is rendered into a prompt
    pub fn prefix(self) -> &'static str {
        match self {
            MessageKind::Human => "Human: ",
            MessageKind::AiResponse => "AI: ",
            MessageKind::Instruction => "Instruction: ",
            MessageKind::AiReasoning | MessageKind::Data => "",
        }
    }

    /// Kinds where a bucket only keeps the most recent message
    pub fn is_latest_wins(self) -> bool {
        matches!(self, MessageKind::Instruction | MessageKind::Data)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// A message that has been stored in a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Logical timestamp, unique and increasing within a conversation
    pub stamp: u64,
    pub at: DateTime<Utc>,
    pub kind: MessageKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataRecord>,
}

impl Message {
    pub fn render(&self) -> String {
        format!("{}{}", self.kind.prefix(), self.text)
    }
}

/// Message not yet stamped, as produced by modules and carried on events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub kind: MessageKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataRecord>,
}

/// Ordered batch of memory items destined for one bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryPiece {
    pub items: Vec<MemoryItem>,
}

impl MemoryPiece {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn with(mut self, kind: MessageKind, text: impl Into<String>) -> Self {
        self.items.push(MemoryItem {
            kind,
            text: text.into(),
            data: None,
        });
        self
    }

    pub fn human(self, text: impl Into<String>) -> Self {
        self.with(MessageKind::Human, text)
    }

    pub fn ai_response(self, text: impl Into<String>) -> Self {
        self.with(MessageKind::AiResponse, text)
    }

    pub fn ai_reasoning(self, text: impl Into<String>) -> Self {
        self.with(MessageKind::AiReasoning, text)
    }

    pub fn instruction(self, text: impl Into<String>) -> Self {
        self.with(MessageKind::Instruction, text)
    }

    pub fn data(mut self, text: impl Into<String>, data: DataRecord) -> Self {
        self.items.push(MemoryItem {
            kind: MessageKind::Data,
            text: text.into(),
            data: Some(data),
        });
        self
    }
}

// ============================================================================
// Buckets
// ============================================================================

/// One bucket of messages, kept sorted by stamp
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationMemory {
    messages: Vec<Message>,
}

impl ConversationMemory {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Store a message, replacing any older message of a latest-wins kind
    pub fn insert(&mut self, message: Message) {
        if message.kind.is_latest_wins() {
            self.messages.retain(|m| m.kind != message.kind);
        }
        self.merge(message);
    }

    /// Store a message by stamp only; equal stamps collapse to one entry
    pub fn merge(&mut self, message: Message) {
        match self
            .messages
            .binary_search_by_key(&message.stamp, |m| m.stamp)
        {
            Ok(index) => self.messages[index] = message,
            Err(index) => self.messages.insert(index, message),
        }
    }

    /// Render the messages of the given kinds, one per line
    pub fn render(&self, kinds: Option<&[MessageKind]>) -> String {
        let mut out = String::new();
        for message in self
            .messages
            .iter()
            .filter(|m| kinds.map_or(true, |k| k.contains(&m.kind)))
        {
            out.push_str(&message.render());
            out.push('\n');
        }
        out
    }

    /// Structured data carried by the data messages, later values winning
    pub fn data(&self) -> DataRecord {
        let mut record = DataRecord::new();
        for message in &self.messages {
            if let Some(data) = &message.data {
                record.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        record
    }
}

/// All buckets of a conversation plus the stamp clock
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: HashMap<(String, ScopeId), ConversationMemory>,
    next_stamp: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket(&self, module: &str, scope: ScopeId) -> Option<&ConversationMemory> {
        self.buckets.get(&(module.to_string(), scope))
    }

    fn bucket_mut(&mut self, module: &str, scope: ScopeId) -> &mut ConversationMemory {
        self.buckets
            .entry((module.to_string(), scope))
            .or_default()
    }

    fn stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    /// Stamp the piece's items and insert them into `module`'s `scope`
    pub fn add(&mut self, module: &str, scope: ScopeId, piece: &MemoryPiece) {
        for item in &piece.items {
            let message = Message {
                stamp: self.stamp(),
                at: Utc::now(),
                kind: item.kind,
                text: item.text.clone(),
                data: item.data.clone(),
            };
            self.bucket_mut(module, scope).insert(message);
        }
    }

    /// Forward a filtered snapshot of `source`'s bucket into `target`'s.
    /// Stamps are preserved, so repeating a copy changes nothing.
    pub fn copy(
        &mut self,
        source: &str,
        target: &str,
        scope: ScopeId,
        filter: Option<&[MessageKind]>,
    ) {
        if source == target {
            return;
        }
        let Some(snapshot) = self.bucket(source, scope).map(|b| {
            b.messages
                .iter()
                .filter(|m| filter.map_or(true, |kinds| kinds.contains(&m.kind)))
                .cloned()
                .collect::<Vec<_>>()
        }) else {
            return;
        };

        let bucket = self.bucket_mut(target, scope);
        for message in snapshot {
            bucket.merge(message);
        }
    }

    /// Snapshot of every bucket, for debugging and recordings
    pub fn snapshot(&self) -> Vec<(String, ScopeId, Vec<Message>)> {
        let mut out: Vec<_> = self
            .buckets
            .iter()
            .map(|((module, scope), bucket)| (module.clone(), *scope, bucket.messages.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        out
    }
}
