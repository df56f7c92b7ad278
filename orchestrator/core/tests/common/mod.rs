// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the mission engine integration tests.
//!
//! `ScriptedProvider` answers prompts by substring: the first rule whose
//! needle occurs in the prompt supplies the reply, cycling through its
//! replies on repeated calls. Prompts no rule matches are rejected with a
//! permanent error so a missing script line fails loudly.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use mission_core::application::{MissionEngine, MissionStores};
use mission_core::domain::agent::{AgentId, AgentProfile};
use mission_core::domain::engine_config::{EngineConfig, EngineConfigManifest};
use mission_core::domain::llm::{
    GenerationOptions, ProviderError, ProviderResponse, ReasoningProvider, TokenUsage,
};
use mission_core::infrastructure::llm::ProviderRegistry;
use mission_core::infrastructure::resilience::{CircuitBreakerConfig, ResilienceLayer, RetryPolicy};

struct Rule {
    needle: String,
    replies: Vec<Result<String, ProviderError>>,
    next: usize,
}

pub struct ScriptedProvider {
    name: String,
    rules: Mutex<Vec<Rule>>,
    prompts: Mutex<Vec<String>>,
    finished: Mutex<usize>,
    cost: f64,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            finished: Mutex::new(0),
            cost: 0.01,
            delay: None,
        }
    }

    pub fn reply(self, needle: &str, text: &str) -> Self {
        self.replies(needle, &[text])
    }

    pub fn replies(self, needle: &str, texts: &[&str]) -> Self {
        self.rules.lock().push(Rule {
            needle: needle.to_string(),
            replies: texts.iter().map(|text| Ok(text.to_string())).collect(),
            next: 0,
        });
        self
    }

    pub fn fail(self, needle: &str, error: ProviderError) -> Self {
        self.outcomes(needle, vec![Err(error)])
    }

    /// Mixed successes and failures, in call order.
    pub fn outcomes(self, needle: &str, outcomes: Vec<Result<&str, ProviderError>>) -> Self {
        self.rules.lock().push(Rule {
            needle: needle.to_string(),
            replies: outcomes
                .into_iter()
                .map(|outcome| outcome.map(str::to_string))
                .collect(),
            next: 0,
        });
        self
    }

    /// Cost reported per successful call
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Calls that ran to completion, as opposed to being dropped mid-delay.
    pub fn finished(&self) -> usize {
        *self.finished.lock()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .iter()
            .filter(|prompt| prompt.contains(needle))
            .count()
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedProvider {
    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        self.prompts.lock().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        *self.finished.lock() += 1;

        let reply = {
            let mut rules = self.rules.lock();
            rules
                .iter_mut()
                .find(|rule| prompt.contains(&rule.needle))
                .map(|rule| {
                    let reply = rule.replies[rule.next % rule.replies.len()].clone();
                    rule.next += 1;
                    reply
                })
        };

        let text = match reply {
            Some(reply) => reply?,
            None => {
                return Err(ProviderError::InvalidInput(format!(
                    "no scripted reply for prompt: {}",
                    prompt.lines().last().unwrap_or_default()
                )))
            }
        };
        Ok(ProviderResponse {
            text,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
                cost: self.cost,
            },
            provider: self.name.clone(),
            model: "scripted".to_string(),
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

pub fn agent(id: &str, provider: &str, capabilities: &[&str]) -> AgentProfile {
    AgentProfile::new(AgentId::new(id).unwrap(), provider)
        .with_capabilities(capabilities.iter().copied())
}

/// Engine config with a fixed seed and the planner pinned to `planner`.
pub fn config(agents: Vec<AgentProfile>) -> EngineConfig {
    let mut config = EngineConfigManifest::default().spec;
    config.engine.seed = Some(1234);
    config.engine.planner_provider = Some("planner".to_string());
    config.agents = agents;
    config
}

pub fn plan(steps: serde_json::Value) -> String {
    format!("```json\n{}\n```", serde_json::json!({ "steps": steps }))
}

pub struct Harness {
    pub engine: MissionEngine,
    pub resilience: Arc<ResilienceLayer>,
    pub stores: MissionStores,
}

pub struct HarnessBuilder {
    config: EngineConfig,
    providers: Vec<(String, Arc<ScriptedProvider>)>,
    retry: RetryPolicy,
    breaker: CircuitBreakerConfig,
    stores: Option<MissionStores>,
}

impl HarnessBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            providers: Vec::new(),
            retry: RetryPolicy::immediate(1),
            breaker: CircuitBreakerConfig::default(),
            stores: None,
        }
    }

    pub fn provider(mut self, name: &str, provider: Arc<ScriptedProvider>) -> Self {
        self.providers.push((name.to_string(), provider));
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Reuse existing stores, as a restarted process would.
    pub fn stores(mut self, stores: MissionStores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn build(self) -> Harness {
        let resilience = Arc::new(ResilienceLayer::new(self.retry, self.breaker));
        let mut registry = ProviderRegistry::new(resilience.clone());
        for (name, provider) in self.providers {
            registry.register(&name, provider);
        }
        let stores = self.stores.unwrap_or_else(MissionStores::in_memory);
        let engine = MissionEngine::new(
            &self.config,
            Arc::new(registry),
            stores.events.clone(),
            stores.cache.clone(),
        );
        Harness {
            engine,
            resilience,
            stores,
        }
    }
}
