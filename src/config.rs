//! Engine configuration
//!
//! Read from a JSON file (by default `configuration/default.json` next to the
//! chatbot documents), with a few environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_GREETING: &str = "Hello";
pub const DEFAULT_UNAVAILABLE_MESSAGE: &str =
    "Sorry, I cannot answer right now. Please try again in a moment.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Model choice: a bare id, or an id with a sampling temperature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LlmSelection {
    Id(String),
    Detailed {
        id: String,
        #[serde(default)]
        temperature: f32,
    },
}

impl LlmSelection {
    pub fn id(&self) -> &str {
        match self {
            LlmSelection::Id(id) | LlmSelection::Detailed { id, .. } => id,
        }
    }

    pub fn temperature(&self) -> f32 {
        match self {
            LlmSelection::Id(_) => 0.0,
            LlmSelection::Detailed { temperature, .. } => *temperature,
        }
    }

    /// Registry key; selections differing only in temperature get
    /// separate services
    pub fn key(&self) -> String {
        format!("{}@{}", self.id(), self.temperature())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfiguration {
    pub name: String,
    pub llm: LlmSelection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeginWith {
    #[default]
    Chatbot,
    User,
}

/// Who opens the conversation, and with what
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Begin {
    #[serde(default, rename = "with")]
    pub with: BeginWith,
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

fn default_llm() -> LlmSelection {
    LlmSelection::Id(DEFAULT_MODEL.to_string())
}

fn default_languages() -> String {
    "any".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_llm_max_attempts() -> u32 {
    3
}

fn default_unavailable_message() -> String {
    DEFAULT_UNAVAILABLE_MESSAGE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default = "default_llm")]
    pub default_llm: LlmSelection,
    /// Comma separated language names, or `any`
    #[serde(default = "default_languages")]
    pub languages: String,
    #[serde(default)]
    pub modules: Vec<ModuleConfiguration>,
    #[serde(default)]
    pub begin: Option<Begin>,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_llm_max_attempts")]
    pub llm_max_attempts: u32,
    #[serde(default = "default_unavailable_message")]
    pub unavailable_message: String,
    /// Directories searched for evaluator scripts
    #[serde(default)]
    pub load_path: Vec<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            default_llm: default_llm(),
            languages: default_languages(),
            modules: Vec::new(),
            begin: None,
            llm_timeout_secs: default_llm_timeout_secs(),
            llm_max_attempts: default_llm_max_attempts(),
            unavailable_message: default_unavailable_message(),
            load_path: Vec::new(),
        }
    }
}

impl Configuration {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Explicit file if given, otherwise `configuration/default.json` under
    /// the chatbot directory, otherwise defaults. The chatbot directory is
    /// always on the evaluator load path.
    pub fn discover(chatbot: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let chatbot_dir = if chatbot.is_dir() {
            chatbot.to_path_buf()
        } else {
            chatbot
                .parent()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        };

        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let candidate = chatbot_dir.join("configuration").join("default.json");
                if candidate.is_file() {
                    tracing::info!(path = %candidate.display(), "Using configuration");
                    Self::load(candidate)?
                } else {
                    tracing::info!("Using default configuration");
                    Self::default()
                }
            }
        };

        if !config.load_path.contains(&chatbot_dir) {
            config.load_path.push(chatbot_dir);
        }
        Ok(config)
    }

    /// Apply `DIALOG_DEFAULT_MODEL`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("DIALOG_DEFAULT_MODEL") {
            if !model.is_empty() {
                self.default_llm = LlmSelection::Id(model);
            }
        }
        self
    }

    pub fn llm_for_module(&self, module: &str) -> &LlmSelection {
        self.modules
            .iter()
            .find(|m| m.name == module)
            .map_or(&self.default_llm, |m| &m.llm)
    }

    /// Greeting said on start, unless the user speaks first
    pub fn greeting(&self) -> Option<&str> {
        match &self.begin {
            Some(Begin {
                with: BeginWith::User,
                ..
            }) => None,
            Some(begin) => Some(&begin.greeting),
            None => Some(DEFAULT_GREETING),
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    /// Language clause added to menu presentations
    pub fn languages_prompt(&self) -> String {
        let languages = self.languages.trim();
        if languages.split(',').count() > 1 {
            format!(
                "\nYou are only able to answer the user in the following languages: {languages}\n\
                 \nIf the user uses a language different from {languages}, ask politely to switch to some of these languages: {languages}"
            )
        } else if languages.eq_ignore_ascii_case("any") {
            "\nYou can communicate with the user in any language.\n".to_string()
        } else {
            format!(
                "\nYou are only able to answer in {languages}\n\
                 \nIf the user uses a language different from {languages}, ask politely to switch to {languages}"
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config: Configuration = serde_json::from_str("{}").unwrap();
        assert_eq!(config.default_llm.id(), DEFAULT_MODEL);
        assert_eq!(config.greeting(), Some("Hello"));
        assert_eq!(config.llm_timeout(), Duration::from_secs(60));
        assert_eq!(config.llm_max_attempts, 3);
    }

    #[test]
    fn test_module_override_and_temperature() {
        let config: Configuration = serde_json::from_str(
            r#"{"default_llm": "gpt-4o",
                "modules": [{"name": "order", "llm": {"id": "gpt-4o-mini", "temperature": 0.5}}]}"#,
        )
        .unwrap();
        assert_eq!(config.llm_for_module("order").id(), "gpt-4o-mini");
        assert!((config.llm_for_module("order").temperature() - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.llm_for_module("menu").id(), "gpt-4o");
        assert_ne!(
            config.llm_for_module("order").key(),
            config.llm_for_module("menu").key()
        );
    }

    #[test]
    fn test_user_begins_has_no_greeting() {
        let config: Configuration =
            serde_json::from_str(r#"{"begin": {"with": "user"}}"#).unwrap();
        assert_eq!(config.greeting(), None);

        let config: Configuration =
            serde_json::from_str(r#"{"begin": {"greeting": "Welcome!"}}"#).unwrap();
        assert_eq!(config.greeting(), Some("Welcome!"));
    }

    #[test]
    fn test_languages_prompt() {
        let mut config = Configuration::default();
        assert!(config.languages_prompt().contains("any language"));
        config.languages = "English, Spanish".to_string();
        assert!(config.languages_prompt().contains("some of these languages"));
        config.languages = "Spanish".to_string();
        assert!(config.languages_prompt().contains("only able to answer in Spanish"));
    }

    #[test]
    fn test_discover_reads_default_file() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("configuration")).unwrap();
        fs::write(
            dir.path().join("configuration").join("default.json"),
            r#"{"languages": "English"}"#,
        )
        .unwrap();

        let config = Configuration::discover(dir.path(), None).unwrap();
        assert_eq!(config.languages, "English");
        assert_eq!(config.load_path, vec![dir.path().to_path_buf()]);
    }
}
