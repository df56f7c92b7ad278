// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mixture-of-experts routing.
//!
//! Each configured route names a registered strategy (the expert) and the
//! keywords that attract work to it. Affinity is the number of route keywords
//! found in the prompt or in the step's `domain` parameter. The best route
//! runs alone unless `max_parallel > 1`, in which case every route with
//! positive affinity up to that limit runs concurrently and the answers are
//! synthesized by `weight * affinity * confidence`.

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use super::{
    derive_seed, ReasoningStrategy, StrategyContext, StrategyError, StrategyInput, StrategyOutcome,
};
use crate::domain::engine_config::{ExpertRoute, MixtureOfExpertsSettings};
use crate::domain::llm::TokenUsage;
use crate::domain::plan::TraceEntry;

const NAME: &str = "mixture_of_experts";

pub struct MixtureOfExpertsStrategy {
    settings: MixtureOfExpertsSettings,
}

struct Selected<'a> {
    index: usize,
    route: &'a ExpertRoute,
    affinity: usize,
}

impl Selected<'_> {
    /// Affinity 0 only reaches here through the fallback route.
    fn weight(&self) -> f64 {
        self.route.weight.max(0.0) * self.affinity.max(1) as f64
    }
}

impl MixtureOfExpertsStrategy {
    pub fn new(settings: MixtureOfExpertsSettings) -> Self {
        Self { settings }
    }

    fn affinity(route: &ExpertRoute, haystack: &str) -> usize {
        route
            .keywords
            .iter()
            .filter(|keyword| !keyword.is_empty() && haystack.contains(&keyword.to_lowercase()))
            .count()
    }

    fn select(&self, input: &StrategyInput) -> Vec<Selected<'_>> {
        let haystack = format!(
            "{} {}",
            input.prompt.to_lowercase(),
            input.parameter_str("domain").unwrap_or_default().to_lowercase()
        );

        // Routing back into this strategy would never terminate
        let mut ranked: Vec<Selected<'_>> = self
            .settings
            .routes
            .iter()
            .enumerate()
            .filter(|(_, route)| route.expert != NAME)
            .map(|(index, route)| Selected {
                index,
                route,
                affinity: Self::affinity(route, &haystack),
            })
            .collect();
        ranked.sort_by(|a, b| b.affinity.cmp(&a.affinity));

        match ranked.first() {
            Some(top) if top.affinity > 0 => ranked
                .into_iter()
                .filter(|selected| selected.affinity > 0)
                .take(self.settings.max_parallel.max(1))
                .collect(),
            // Nothing matched; stable sort left the routes in configured order
            _ => ranked.into_iter().take(1).collect(),
        }
    }
}

#[async_trait]
impl ReasoningStrategy for MixtureOfExpertsStrategy {
    fn name(&self) -> &str {
        NAME
    }

    async fn run(
        &self,
        input: &StrategyInput,
        context: &StrategyContext,
    ) -> Result<StrategyOutcome, StrategyError> {
        let selected = self.select(input);
        if selected.is_empty() {
            return Err(StrategyError::NoResult {
                strategy: NAME.to_string(),
                reason: "no expert routes configured".to_string(),
            });
        }

        let mut trace = vec![TraceEntry::new(
            "route",
            selected
                .iter()
                .map(|s| format!("{}({})", s.route.name, s.affinity))
                .collect::<Vec<_>>()
                .join(", "),
        )];
        debug!(routes = selected.len(), "Dispatching to experts");

        let runs = selected.iter().map(|s| async move {
            let expert = context.strategies.get(&s.route.expert)?;
            let sub_context = context.with_seed(derive_seed(context.seed, s.index, 0, 0));
            expert.run(input, &sub_context).await
        });
        let results = join_all(runs).await;

        let mut usage = TokenUsage::default();
        let mut answers: Vec<(&Selected<'_>, StrategyOutcome)> = Vec::new();
        let mut last_error = None;
        for (s, result) in selected.iter().zip(results) {
            match result {
                Ok(outcome) => {
                    usage.add(&outcome.usage);
                    trace.push(TraceEntry::scored(
                        format!("expert {}", s.route.name),
                        outcome.result.clone(),
                        outcome.confidence,
                    ));
                    trace.extend(outcome.trace.iter().map(|entry| TraceEntry {
                        stage: format!("{}/{}", s.route.name, entry.stage),
                        ..entry.clone()
                    }));
                    answers.push((s, outcome));
                }
                Err(e) => {
                    trace.push(TraceEntry::new(format!("expert {}", s.route.name), e.to_string()));
                    last_error = Some(e);
                }
            }
        }

        let mut winner: Option<(usize, f64)> = None;
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for (idx, (s, outcome)) in answers.iter().enumerate() {
            let score = s.weight() * outcome.confidence;
            weighted += score;
            total_weight += s.weight();
            if winner.is_none_or(|(_, best)| score > best) {
                winner = Some((idx, score));
            }
        }

        let Some((winner, _)) = winner else {
            return Err(last_error.unwrap_or_else(|| StrategyError::NoResult {
                strategy: NAME.to_string(),
                reason: "every expert failed".to_string(),
            }));
        };

        let (_, outcome) = answers.swap_remove(winner);
        let confidence = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            outcome.confidence
        };

        Ok(StrategyOutcome {
            result: outcome.result,
            confidence,
            trace,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{context, Canned};
    use super::*;

    fn route(name: &str, keywords: &[&str], expert: &str, weight: f64) -> ExpertRoute {
        ExpertRoute {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            expert: expert.to_string(),
            weight,
        }
    }

    #[tokio::test]
    async fn test_routes_to_highest_affinity_expert() {
        let provider = Canned::new().on("Q3", &["Answer: 42"]);
        let (provider, ctx) = context(provider);

        let outcome = MixtureOfExpertsStrategy::new(MixtureOfExpertsSettings::default())
            .run(&StrategyInput::new("Estimate the numbers for Q3"), &ctx)
            .await
            .unwrap();

        // analyst route delegates to self_consistency with 5 samples
        assert_eq!(outcome.result, "Answer: 42");
        assert_eq!(outcome.confidence, 1.0);
        assert_eq!(provider.calls(), 5);
        assert!(outcome.trace[0].detail.starts_with("analyst(2)"));
    }

    #[tokio::test]
    async fn test_domain_parameter_counts_towards_affinity() {
        let provider = Canned::new()
            .on("Rewrite the response", &["unused"])
            .on("Review the response", &["OK"])
            .on("Summarize", &["A careful summary"]);
        let (_, ctx) = context(provider);

        let input = StrategyInput::new("Summarize the vendor contract")
            .with_parameters(serde_json::json!({ "domain": "legal compliance" }));
        let outcome = MixtureOfExpertsStrategy::new(MixtureOfExpertsSettings::default())
            .run(&input, &ctx)
            .await
            .unwrap();

        assert_eq!(outcome.result, "A careful summary");
        assert!(outcome.trace[0].detail.starts_with("reviewer(2)"));
    }

    #[tokio::test]
    async fn test_no_match_falls_back_to_first_route_and_skips_self() {
        let settings = MixtureOfExpertsSettings {
            max_parallel: 1,
            routes: vec![
                route("loop", &["hello"], NAME, 5.0),
                route("generalist", &[], "direct", 1.0),
            ],
        };
        let provider = Canned::new().on("hello", &["hi"]);
        let (provider, ctx) = context(provider);

        let outcome = MixtureOfExpertsStrategy::new(settings)
            .run(&StrategyInput::new("hello there"), &ctx)
            .await
            .unwrap();

        assert_eq!(outcome.result, "hi");
        assert_eq!(provider.calls(), 1);
        assert_eq!(outcome.trace[0].detail, "generalist(0)");
    }

    #[tokio::test]
    async fn test_parallel_experts_pick_heaviest_answer() {
        let settings = MixtureOfExpertsSettings {
            max_parallel: 2,
            routes: vec![
                route("light", &["alpha"], "direct", 1.0),
                route("heavy", &["alpha", "beta"], "direct", 2.0),
                route("idle", &["gamma"], "direct", 9.0),
            ],
        };
        let provider = Canned::new().on("alpha", &["from heavy", "from light"]);
        let (provider, ctx) = context(provider);

        let outcome = MixtureOfExpertsStrategy::new(settings)
            .run(&StrategyInput::new("alpha and beta"), &ctx)
            .await
            .unwrap();

        assert_eq!(provider.calls(), 2);
        assert_eq!(outcome.result, "from heavy");
        assert_eq!(outcome.confidence, 1.0);
        assert!((outcome.usage.cost - 0.02).abs() < 1e-9);
    }
}
