// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Provider Registry - Named Reasoning Providers
//
// Builds provider adapters from engine configuration and wraps each one with
// the resilience layer. Agents reference providers by name; the planner uses
// the configured planner provider or the first enabled one.

use crate::domain::engine_config::{EngineConfig, ProviderSettings};
use crate::domain::llm::{ProviderError, ReasoningProvider};
use crate::infrastructure::resilience::ResilienceLayer;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::ollama::OllamaAdapter;
use super::openai::OpenAIAdapter;

/// Registry of resilient providers keyed by configured name
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ReasoningProvider>>,
    /// Registration order, used to pick a default provider
    order: Vec<String>,
    resilience: Arc<ResilienceLayer>,
}

impl ProviderRegistry {
    pub fn new(resilience: Arc<ResilienceLayer>) -> Self {
        Self {
            providers: HashMap::new(),
            order: Vec::new(),
            resilience,
        }
    }

    /// Create provider registry from engine configuration
    pub fn from_config(
        config: &EngineConfig,
        resilience: Arc<ResilienceLayer>,
    ) -> anyhow::Result<Self> {
        let mut registry = Self::new(resilience);

        info!("Initializing reasoning provider registry");

        for provider_config in &config.providers {
            if !provider_config.enabled {
                info!("Provider '{}' disabled, skipping", provider_config.name);
                continue;
            }

            match Self::create_provider(provider_config) {
                Ok(provider) => {
                    info!(
                        "Registered provider '{}' ({} / {})",
                        provider_config.name, provider_config.provider_type, provider_config.model
                    );
                    registry.register(&provider_config.name, provider);
                }
                Err(e) => {
                    warn!("Failed to initialize provider '{}': {}", provider_config.name, e);
                    // Continue with other providers
                }
            }
        }

        if registry.is_empty() {
            warn!("No reasoning providers configured - missions cannot be planned or executed");
        }

        Ok(registry)
    }

    /// Create a provider instance from configuration
    fn create_provider(config: &ProviderSettings) -> anyhow::Result<Arc<dyn ReasoningProvider>> {
        let api_key = Self::resolve_api_key(&config.api_key)?;

        let provider: Arc<dyn ReasoningProvider> = match config.provider_type.as_str() {
            // OpenAI-compatible APIs (LM Studio, vLLM, etc.) share the adapter
            "openai" | "openai-compatible" => Arc::new(OpenAIAdapter::new(
                config.name.clone(),
                config.endpoint.clone(),
                api_key,
                config.model.clone(),
                config.cost_per_1k_tokens,
            )),
            "ollama" => Arc::new(OllamaAdapter::new(
                config.name.clone(),
                config.endpoint.clone(),
                config.model.clone(),
                config.cost_per_1k_tokens,
            )),
            _ => anyhow::bail!("Unsupported provider type: {}", config.provider_type),
        };

        Ok(provider)
    }

    /// Resolve API key from config (supports "env:VAR_NAME" syntax)
    fn resolve_api_key(key: &Option<String>) -> anyhow::Result<String> {
        match key {
            Some(k) => match k.strip_prefix("env:") {
                Some(var_name) => std::env::var(var_name)
                    .map_err(|_| anyhow::anyhow!("Environment variable not set: {}", var_name)),
                None => Ok(k.clone()),
            },
            None => Ok(String::new()), // For local providers without auth
        }
    }

    /// Register a raw provider under `name`, wrapped with retry and circuit breaking.
    pub fn register(&mut self, name: &str, provider: Arc<dyn ReasoningProvider>) {
        let wrapped = self.resilience.wrap(name, provider);
        if self.providers.insert(name.to_string(), wrapped).is_none() {
            self.order.push(name.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ReasoningProvider>> {
        self.providers.get(name).cloned()
    }

    /// `preferred` when registered, otherwise the first registered provider.
    pub fn resolve(&self, preferred: Option<&str>) -> Option<(String, Arc<dyn ReasoningProvider>)> {
        let name = match preferred {
            Some(name) => name.to_string(),
            None => self.order.first()?.clone(),
        };
        self.get(&name).map(|provider| (name, provider))
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn resilience(&self) -> &Arc<ResilienceLayer> {
        &self.resilience
    }

    /// Check health of all providers
    pub async fn health_check_all(&self) -> HashMap<String, Result<(), ProviderError>> {
        let mut results = HashMap::new();

        for name in &self.order {
            if let Some(provider) = self.providers.get(name) {
                info!("Health checking provider: {}", name);
                results.insert(name.clone(), provider.health_check().await);
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(name: &str, provider_type: &str, enabled: bool) -> ProviderSettings {
        ProviderSettings {
            name: name.to_string(),
            provider_type: provider_type.to_string(),
            endpoint: "http://localhost:11434".to_string(),
            api_key: None,
            model: "llama3.2".to_string(),
            cost_per_1k_tokens: 0.0,
            enabled,
        }
    }

    #[test]
    fn test_registry_creation() {
        let config = EngineConfig {
            providers: vec![
                settings("local", "ollama", true),
                settings("compat", "openai-compatible", true),
                settings("off", "ollama", false),
                settings("bogus", "carrier-pigeon", true),
            ],
            ..EngineConfig::default()
        };

        let registry =
            ProviderRegistry::from_config(&config, Arc::new(ResilienceLayer::default())).unwrap();
        assert_eq!(registry.names(), vec!["local".to_string(), "compat".to_string()]);
        assert!(registry.get("off").is_none());
        assert_eq!(registry.resolve(None).map(|(name, _)| name), Some("local".to_string()));
        assert!(registry.resolve(Some("missing")).is_none());
    }

    #[test]
    fn test_resolve_api_key() {
        assert_eq!(
            ProviderRegistry::resolve_api_key(&Some("sk-inline".into())).unwrap(),
            "sk-inline"
        );
        assert_eq!(ProviderRegistry::resolve_api_key(&None).unwrap(), "");
        assert!(
            ProviderRegistry::resolve_api_key(&Some("env:MISSION_TEST_KEY_THAT_IS_UNSET".into()))
                .is_err()
        );
    }
}
