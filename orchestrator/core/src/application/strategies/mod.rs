// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reasoning Strategy Library
//!
//! Every strategy implements [`ReasoningStrategy`] and is looked up by name in
//! a [`StrategyRegistry`]; a plan step names its strategy in its policy and the
//! step executor never branches on concrete types.
//!
//! | Name | Algorithm |
//! |------|-----------|
//! | `direct` | single generation |
//! | `tree_search` | expand, score, prune, recurse on the beam |
//! | `mixture_of_experts` | keyword routing to other registered strategies |
//! | `self_consistency` | N samples, plurality vote over normalized answers |
//! | `constitutional` | generate, critique against rules, revise |
//! | `debate` | proposer/critic rounds and a judge verdict |
//!
//! Control flow is a pure function of the seed in [`StrategyContext`] and the
//! provider's answers: sampling temperatures come from a seeded `StdRng` and
//! every tie is broken by index.

pub mod constitutional;
pub mod debate;
pub mod direct;
pub mod mixture_of_experts;
pub mod self_consistency;
pub mod tree_search;

pub use constitutional::ConstitutionalStrategy;
pub use debate::DebateStrategy;
pub use direct::DirectStrategy;
pub use mixture_of_experts::MixtureOfExpertsStrategy;
pub use self_consistency::SelfConsistencyStrategy;
pub use tree_search::TreeSearchStrategy;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::engine_config::StrategySettings;
use crate::domain::llm::{GenerationOptions, ProviderError, ReasoningProvider, TokenUsage};
use crate::domain::plan::TraceEntry;

#[async_trait]
pub trait ReasoningStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        input: &StrategyInput,
        context: &StrategyContext,
    ) -> Result<StrategyOutcome, StrategyError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyInput {
    pub prompt: String,
    /// Step parameters; strategies may read hints such as `domain`.
    pub parameters: serde_json::Value,
}

impl StrategyInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            parameters: serde_json::Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|value| value.as_str())
    }
}

#[derive(Clone)]
pub struct StrategyContext {
    /// Resilience-wrapped provider of the agent running the strategy
    pub provider: Arc<dyn ReasoningProvider>,
    pub provider_name: String,
    pub seed: u64,
    pub options: GenerationOptions,
    /// Lets composite strategies delegate by name
    pub strategies: Arc<StrategyRegistry>,
    /// Every provider call made through this context, shared with derived contexts
    pub meter: UsageMeter,
}

impl StrategyContext {
    pub fn new(
        provider_name: impl Into<String>,
        provider: Arc<dyn ReasoningProvider>,
        seed: u64,
        strategies: Arc<StrategyRegistry>,
    ) -> Self {
        Self {
            provider,
            provider_name: provider_name.into(),
            seed,
            options: GenerationOptions::default(),
            strategies,
            meter: UsageMeter::default(),
        }
    }

    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }

    /// One provider call; usage is accumulated into `usage` and the meter.
    pub(crate) async fn generate(
        &self,
        prompt: &str,
        temperature: Option<f32>,
        usage: &mut TokenUsage,
    ) -> Result<String, StrategyError> {
        let options = match temperature {
            Some(t) => self.options.with_temperature(t),
            None => self.options.clone(),
        };
        let response = self
            .provider
            .generate(prompt, &options)
            .await
            .map_err(|source| StrategyError::Provider {
                provider: self.provider_name.clone(),
                source,
            })?;
        usage.add(&response.usage);
        self.meter.record(&response.usage);
        Ok(response.text)
    }
}

/// Running total of provider usage for one branch.
///
/// Survives an early error return, a timeout or an abort of the strategy, so
/// calls that completed before the failure are still billed.
#[derive(Debug, Clone, Default)]
pub struct UsageMeter(Arc<Mutex<TokenUsage>>);

impl UsageMeter {
    pub fn record(&self, usage: &TokenUsage) {
        self.0.lock().add(usage);
    }

    pub fn total(&self) -> TokenUsage {
        *self.0.lock()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutcome {
    pub result: String,
    /// In `[0, 1]`
    pub confidence: f64,
    pub trace: Vec<TraceEntry>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum StrategyError {
    #[error("Provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("Unknown reasoning strategy '{0}'")]
    UnknownStrategy(String),

    #[error("Strategy '{strategy}' produced no result: {reason}")]
    NoResult { strategy: String, reason: String },
}

/// Lookup table of named strategies.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn ReasoningStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in strategy, tuned by `settings`.
    pub fn with_defaults(settings: &StrategySettings) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DirectStrategy));
        registry.register(Arc::new(TreeSearchStrategy::new(settings.tree_search.clone())));
        registry.register(Arc::new(MixtureOfExpertsStrategy::new(
            settings.mixture_of_experts.clone(),
        )));
        registry.register(Arc::new(SelfConsistencyStrategy::new(
            settings.self_consistency.samples,
        )));
        registry.register(Arc::new(ConstitutionalStrategy::new(
            settings.constitutional.clone(),
        )));
        registry.register(Arc::new(DebateStrategy::new(settings.debate.rounds)));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn ReasoningStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ReasoningStrategy>, StrategyError> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| StrategyError::UnknownStrategy(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Mix a mission seed with a step coordinate into a per-run seed.
///
/// SplitMix64 finalizer over each component, so neighbouring positions and
/// branches get unrelated streams.
pub fn derive_seed(mission_seed: u64, position: usize, revision: u32, branch: usize) -> u64 {
    [position as u64, revision as u64, branch as u64]
        .iter()
        .fold(mission_seed, |acc, part| splitmix64(acc ^ splitmix64(*part)))
}

fn splitmix64(value: u64) -> u64 {
    let mut z = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Canonical form of an answer used for voting.
///
/// Takes the `Answer:` line when present, otherwise the last non-empty line,
/// then lower-cases it, collapses whitespace and strips trailing punctuation.
pub fn normalize_answer(text: &str) -> String {
    let answer_line = text.lines().find_map(|line| {
        let trimmed = line.trim();
        let lower = trimmed.to_ascii_lowercase();
        lower
            .starts_with("answer:")
            .then(|| trimmed["answer:".len()..].to_string())
    });
    let line = answer_line.unwrap_or_else(|| {
        text.lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string()
    });

    line.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ',' | ';' | ':'))
        .trim()
        .to_string()
}

/// Index of the most frequent key; the earliest first occurrence wins ties.
pub(crate) fn plurality<'a, I>(keys: I) -> Option<(usize, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: Vec<(&str, usize, usize)> = Vec::new();
    for (idx, key) in keys.into_iter().enumerate() {
        match counts.iter_mut().find(|(existing, _, _)| *existing == key) {
            Some(entry) => entry.2 += 1,
            None => counts.push((key, idx, 1)),
        }
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(usize, usize)>, (_, first, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((first, count)),
        })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Provider double shared by the strategy unit tests.

    use super::*;
    use crate::domain::llm::ProviderResponse;
    use parking_lot::Mutex;

    /// Answers the first rule whose needle appears in the prompt; each rule
    /// cycles through its replies.
    pub struct Canned {
        rules: Vec<(String, Vec<Result<String, ProviderError>>, Mutex<usize>)>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl Canned {
        pub fn new() -> Self {
            Self {
                rules: Vec::new(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn on(mut self, needle: &str, replies: &[&str]) -> Self {
            let replies = replies.iter().map(|r| Ok(r.to_string())).collect();
            self.rules.push((needle.to_string(), replies, Mutex::new(0)));
            self
        }

        pub fn fail_on(mut self, needle: &str, error: ProviderError) -> Self {
            self.rules
                .push((needle.to_string(), vec![Err(error)], Mutex::new(0)));
            self
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().len()
        }
    }

    #[async_trait]
    impl ReasoningProvider for Canned {
        async fn generate(
            &self,
            prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<ProviderResponse, ProviderError> {
            self.prompts.lock().push(prompt.to_string());
            let (_, replies, cursor) = self
                .rules
                .iter()
                .find(|(needle, _, _)| prompt.contains(needle.as_str()))
                .ok_or_else(|| ProviderError::InvalidInput(format!("unscripted prompt: {prompt}")))?;
            let mut cursor = cursor.lock();
            let reply = replies[*cursor % replies.len()].clone();
            *cursor += 1;
            reply.map(|text| ProviderResponse {
                text,
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                    cost: 0.01,
                },
                provider: "canned".into(),
                model: "canned".into(),
            })
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    pub fn context(provider: Canned) -> (Arc<Canned>, StrategyContext) {
        let provider = Arc::new(provider);
        let registry = Arc::new(StrategyRegistry::with_defaults(&StrategySettings::default()));
        let context = StrategyContext::new("canned", provider.clone(), 42, registry);
        (provider, context)
    }
}
