// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tree search with pruning.
//!
//! Each level expands every frontier node into `branching` candidate thoughts,
//! scores them with a separate evaluation call, drops candidates below
//! `prune_threshold` and keeps the best `beam` as the next frontier. After
//! `depth` levels the best surviving leaf is the answer and its score is the
//! confidence.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use super::{ReasoningStrategy, StrategyContext, StrategyError, StrategyInput, StrategyOutcome};
use crate::domain::engine_config::TreeSearchSettings;
use crate::domain::llm::TokenUsage;
use crate::domain::plan::TraceEntry;

pub const EXPAND_MARKER: &str = "Propose the next reasoning step";
pub const SCORE_MARKER: &str = "Rate how promising this candidate is";

pub struct TreeSearchStrategy {
    settings: TreeSearchSettings,
}

#[derive(Debug, Clone)]
struct Candidate {
    text: String,
    score: f64,
}

impl TreeSearchStrategy {
    pub fn new(settings: TreeSearchSettings) -> Self {
        Self { settings }
    }

    fn expand_prompt(task: &str, parent: Option<&str>, level: usize, branch: usize) -> String {
        match parent {
            Some(parent) => format!(
                "{EXPAND_MARKER} (level {level}, option {branch}).\n\nTask:\n{task}\n\nReasoning so far:\n{parent}\n\nContinue and refine the reasoning towards a complete answer."
            ),
            None => format!(
                "{EXPAND_MARKER} (level {level}, option {branch}).\n\nTask:\n{task}\n\nOffer one distinct approach and a draft answer."
            ),
        }
    }

    fn score_prompt(task: &str, candidate: &str) -> String {
        format!(
            "{SCORE_MARKER} for solving the task, as a number between 0 and 1.\n\nTask:\n{task}\n\nCandidate:\n{candidate}\n\nReply with the number first."
        )
    }
}

/// First number in `text`, clamped to `[0, 1]`; 0 when there is none.
pub(crate) fn parse_score(text: &str) -> f64 {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    NUMBER
        .get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").ok())
        .as_ref()
        .and_then(|re| re.find(text))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|score| score.is_finite())
        .map(|score| score.clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

#[async_trait]
impl ReasoningStrategy for TreeSearchStrategy {
    fn name(&self) -> &str {
        "tree_search"
    }

    async fn run(
        &self,
        input: &StrategyInput,
        context: &StrategyContext,
    ) -> Result<StrategyOutcome, StrategyError> {
        let mut rng = StdRng::seed_from_u64(context.seed);
        let mut usage = TokenUsage::default();
        let mut trace = Vec::new();
        let mut frontier: Vec<Option<Candidate>> = vec![None];
        let mut last_error = None;

        for level in 0..self.settings.depth.max(1) {
            let mut children: Vec<Candidate> = Vec::new();

            for parent in &frontier {
                for branch in 0..self.settings.branching.max(1) {
                    let temperature = rng.random_range(0.4..=1.0) as f32;
                    let prompt = Self::expand_prompt(
                        &input.prompt,
                        parent.as_ref().map(|p| p.text.as_str()),
                        level,
                        branch,
                    );
                    let thought = match context.generate(&prompt, Some(temperature), &mut usage).await {
                        Ok(thought) => thought,
                        Err(e) => {
                            trace.push(TraceEntry::new(format!("expand {level}.{branch}"), e.to_string()));
                            last_error = Some(e);
                            continue;
                        }
                    };

                    let score = match context
                        .generate(&Self::score_prompt(&input.prompt, &thought), Some(0.0), &mut usage)
                        .await
                    {
                        Ok(verdict) => parse_score(&verdict),
                        Err(e) => {
                            last_error = Some(e);
                            0.0
                        }
                    };
                    trace.push(TraceEntry::scored(
                        format!("expand {level}.{branch}"),
                        thought.clone(),
                        score,
                    ));
                    children.push(Candidate { text: thought, score });
                }
            }

            if children.is_empty() {
                return Err(last_error.unwrap_or_else(|| StrategyError::NoResult {
                    strategy: self.name().to_string(),
                    reason: "no candidate thoughts were generated".to_string(),
                }));
            }

            // Stable sort keeps generation order among equal scores
            children.sort_by(|a, b| b.score.total_cmp(&a.score));
            let best = children[0].clone();
            let mut survivors: Vec<Candidate> = children
                .into_iter()
                .filter(|c| c.score >= self.settings.prune_threshold)
                .take(self.settings.beam.max(1))
                .collect();
            if survivors.is_empty() {
                // Everything scored below the threshold; keep searching from the best
                survivors.push(best);
            }
            debug!(level, survivors = survivors.len(), "Tree search level pruned");
            trace.push(TraceEntry::new(
                format!("prune {level}"),
                format!("{} candidate(s) kept", survivors.len()),
            ));
            frontier = survivors.into_iter().map(Some).collect();
        }

        let best = frontier
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| StrategyError::NoResult {
                strategy: self.name().to_string(),
                reason: "empty frontier".to_string(),
            })?;

        Ok(StrategyOutcome {
            result: best.text,
            confidence: best.score,
            trace,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{context, Canned};
    use super::*;

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("0.8 - promising"), 0.8);
        assert_eq!(parse_score("Score: 7"), 1.0);
        assert_eq!(parse_score("not sure"), 0.0);
        assert_eq!(parse_score("-3"), 0.0);
    }

    #[tokio::test]
    async fn test_prunes_and_returns_best_leaf() {
        let strategy = TreeSearchStrategy::new(TreeSearchSettings {
            branching: 2,
            depth: 2,
            prune_threshold: 0.5,
            beam: 1,
        });
        let provider = Canned::new()
            .on(SCORE_MARKER, &["0.9", "0.2", "0.6", "0.95"])
            .on("level 0, option 0", &["approach A"])
            .on("level 0, option 1", &["approach B"])
            .on("level 1, option 0", &["A refined once"])
            .on("level 1, option 1", &["A refined twice"]);
        let (provider, ctx) = context(provider);

        let outcome = strategy
            .run(&StrategyInput::new("Plan a migration"), &ctx)
            .await
            .unwrap();

        assert_eq!(outcome.result, "A refined twice");
        assert_eq!(outcome.confidence, 0.95);
        // 2 expansions + 2 scores per level, beam 1
        assert_eq!(provider.calls(), 8);
        assert!(provider.prompts.lock().iter().any(|p| p.contains("approach A")));
        assert!(!provider.prompts.lock().iter().any(|p| p.contains("Reasoning so far:\napproach B")));
        assert!((outcome.usage.cost - 0.08).abs() < 1e-9);
    }
}
