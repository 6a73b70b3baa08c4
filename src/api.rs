//! HTTP API for chatbot conversations
//!
//! Each conversation owns an [`Engine`] behind its own lock; the compiled
//! chatbot and services are shared by all of them. Chatbot output is
//! buffered per request and returned in the response body.

mod handlers;
mod types;

pub use handlers::{create_router, AppError};
pub use types::*;

use crate::compiler::CompiledChatbot;
use crate::engine::Engine;
use crate::runtime::{BufferedChannel, ChatbotOutput, Services};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// One live conversation
pub struct Conversation {
    pub engine: Engine,
    pub output: BufferedChannel,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    chatbot: Arc<CompiledChatbot>,
    services: Arc<Services>,
    conversations: Arc<RwLock<HashMap<String, Arc<Mutex<Conversation>>>>>,
}

impl AppState {
    pub fn new(chatbot: Arc<CompiledChatbot>, services: Arc<Services>) -> Self {
        Self {
            chatbot,
            services,
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a conversation and register it; returns its id and greeting
    pub async fn open_conversation(&self) -> Result<(String, Vec<ChatbotOutput>), AppError> {
        let output = BufferedChannel::new();
        let mut engine = Engine::new(
            Arc::clone(&self.chatbot),
            Arc::clone(&self.services),
            Box::new(output.clone()),
        );
        engine.start().await?;

        let id = uuid::Uuid::new_v4().to_string();
        let greeting = output.drain();
        self.conversations
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(Conversation { engine, output })));
        tracing::info!(conversation_id = %id, "Conversation opened");
        Ok((id, greeting))
    }

    pub async fn conversation(&self, id: &str) -> Option<Arc<Mutex<Conversation>>> {
        self.conversations.read().await.get(id).cloned()
    }

    /// Drop a conversation; false if it did not exist
    pub async fn close_conversation(&self, id: &str) -> bool {
        let removed = self.conversations.write().await.remove(id).is_some();
        if removed {
            tracing::info!(conversation_id = %id, "Conversation closed");
        }
        removed
    }

    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }
}
