//! Output channels and input sources for the console and HTTP front ends

use super::traits::{Channel, InputSource};
use async_trait::async_trait;
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

const EXIT_COMMANDS: &[&str] = &["exit", "quit"];

// ============================================================================
// Console
// ============================================================================

/// Prints chatbot messages to stdout and reads user lines from stdin
pub struct ConsoleChannel;

impl Channel for ConsoleChannel {
    fn output(&mut self, message: &str, who: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "Chatbot [{who}]: {message}");
        let _ = stdout.flush();
    }

    fn thinking(&mut self) {
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "...\r");
        let _ = stdout.flush();
    }
}

pub struct ConsoleInput {
    lines: Lines<BufReader<Stdin>>,
}

impl Default for ConsoleInput {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleInput {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

#[async_trait]
impl InputSource for ConsoleInput {
    /// Next non-empty line; end of input or an exit command ends the
    /// conversation
    async fn next_input(&mut self) -> Option<String> {
        loop {
            {
                let mut stdout = std::io::stdout().lock();
                let _ = write!(stdout, "You: ");
                let _ = stdout.flush();
            }
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read from stdin");
                    return None;
                }
            };
            let line = line.trim();
            if EXIT_COMMANDS.contains(&line.to_lowercase().as_str()) {
                return None;
            }
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
    }
}

// ============================================================================
// Buffered
// ============================================================================

/// One message produced by the chatbot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatbotOutput {
    pub text: String,
    /// Module that produced the message
    pub who: String,
}

/// Collects output in memory so a request handler can return it
#[derive(Debug, Clone, Default)]
pub struct BufferedChannel {
    buffer: Arc<Mutex<Vec<ChatbotOutput>>>,
}

impl BufferedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything produced since the last drain
    pub fn drain(&self) -> Vec<ChatbotOutput> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Channel for BufferedChannel {
    fn output(&mut self, message: &str, who: &str) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ChatbotOutput {
                text: message.to_string(),
                who: who.to_string(),
            });
    }
}
