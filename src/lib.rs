//! Dialog Engine - declarative LLM chatbots
//!
//! Chatbot documents describe modules (menus, open-ended conversations,
//! data gathering forms, question answering, sequences and actions). The
//! compiler turns them into one hierarchical state machine plus runtime
//! modules; an [`engine::Engine`] runs a conversation over that machine.

pub mod api;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod llm;
pub mod memory;
pub mod recording;
pub mod runtime;
pub mod spec;
pub mod state_machine;
