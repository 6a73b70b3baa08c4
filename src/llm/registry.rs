//! Model registry: which LLM service answers for which module

use super::{LlmService, LoggingService, OpenAIService};
use crate::config::{Configuration, LlmSelection};
use std::collections::HashMap;
use std::sync::Arc;

/// Provider credentials
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    /// OpenAI-compatible endpoint, e.g. a local gateway
    pub base_url: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: std::env::var("OPENAI_BASE_URL").ok(),
        }
    }
}

/// Services keyed by selection, plus the per-module routing
pub struct ModelRegistry {
    services: HashMap<String, Arc<dyn LlmService>>,
    default_key: String,
    module_keys: HashMap<String, String>,
}

impl ModelRegistry {
    /// One service per distinct model selection in the configuration
    pub fn new(config: &LlmConfig, configuration: &Configuration) -> Self {
        let mut services: HashMap<String, Arc<dyn LlmService>> = HashMap::new();
        let selections = std::iter::once(&configuration.default_llm)
            .chain(configuration.modules.iter().map(|m| &m.llm));

        for selection in selections {
            let key = selection.key();
            if services.contains_key(&key) {
                continue;
            }
            if let Some(service) = Self::try_create(selection, config) {
                services.insert(key, service);
            }
        }

        let module_keys = configuration
            .modules
            .iter()
            .map(|m| (m.name.clone(), m.llm.key()))
            .collect();

        Self {
            services,
            default_key: configuration.default_llm.key(),
            module_keys,
        }
    }

    /// Registry that answers every module with `service`
    pub fn single(service: Arc<dyn LlmService>) -> Self {
        let default_key = service.model_id().to_string();
        Self {
            services: HashMap::from([(default_key.clone(), service)]),
            default_key,
            module_keys: HashMap::new(),
        }
    }

    /// Route one module to a dedicated service
    pub fn with_module_service(mut self, module: &str, service: Arc<dyn LlmService>) -> Self {
        let key = format!("module:{module}");
        self.services.insert(key.clone(), service);
        self.module_keys.insert(module.to_string(), key);
        self
    }

    fn try_create(selection: &LlmSelection, config: &LlmConfig) -> Option<Arc<dyn LlmService>> {
        let api_key = config.openai_api_key.as_ref().filter(|k| !k.is_empty())?;

        match OpenAIService::new(api_key.clone(), selection.id(), config.base_url.as_deref()) {
            Ok(service) => {
                let service = service
                    .with_temperature(Some(selection.temperature()))
                    .with_model_id(selection.key());
                Some(Arc::new(LoggingService::new(Arc::new(service))))
            }
            Err(e) => {
                tracing::warn!(model = %selection.id(), error = %e, "Failed to create LLM service");
                None
            }
        }
    }

    /// Service for a module, falling back to the default
    pub fn for_module(&self, module: &str) -> Option<Arc<dyn LlmService>> {
        let key = self.module_keys.get(module).unwrap_or(&self.default_key);
        self.services
            .get(key)
            .or_else(|| self.services.get(&self.default_key))
            .cloned()
    }

    pub fn has_models(&self) -> bool {
        !self.services.is_empty()
    }

    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.services.keys().cloned().collect();
        models.sort();
        models
    }

    pub fn default_model_id(&self) -> &str {
        &self.default_key
    }
}
