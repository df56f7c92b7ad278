// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{
    normalize_answer, plurality, ReasoningStrategy, StrategyContext, StrategyError, StrategyInput,
    StrategyOutcome,
};
use crate::domain::llm::TokenUsage;
use crate::domain::plan::TraceEntry;

/// Runs the same prompt `samples` times and returns the plurality answer.
///
/// Confidence is the share of successful runs that agree with the winner.
/// Failed runs do not vote; if every run fails the last error is returned.
pub struct SelfConsistencyStrategy {
    samples: usize,
}

impl SelfConsistencyStrategy {
    pub fn new(samples: usize) -> Self {
        Self {
            samples: samples.max(1),
        }
    }
}

#[async_trait]
impl ReasoningStrategy for SelfConsistencyStrategy {
    fn name(&self) -> &str {
        "self_consistency"
    }

    async fn run(
        &self,
        input: &StrategyInput,
        context: &StrategyContext,
    ) -> Result<StrategyOutcome, StrategyError> {
        let mut rng = StdRng::seed_from_u64(context.seed);
        let mut usage = TokenUsage::default();
        let mut trace = Vec::new();
        let mut answers: Vec<(String, String)> = Vec::new();
        let mut last_error = None;

        for sample in 0..self.samples {
            let temperature = rng.random_range(0.5..=1.0) as f32;
            match context
                .generate(&input.prompt, Some(temperature), &mut usage)
                .await
            {
                Ok(text) => {
                    let normalized = normalize_answer(&text);
                    trace.push(TraceEntry::new(format!("sample {sample}"), normalized.clone()));
                    answers.push((text, normalized));
                }
                Err(e) => {
                    trace.push(TraceEntry::new(format!("sample {sample}"), e.to_string()));
                    last_error = Some(e);
                }
            }
        }

        let Some((winner, votes)) = plurality(answers.iter().map(|(_, n)| n.as_str())) else {
            return Err(last_error.unwrap_or_else(|| StrategyError::NoResult {
                strategy: self.name().to_string(),
                reason: "no samples".to_string(),
            }));
        };

        let confidence = votes as f64 / answers.len() as f64;
        trace.push(TraceEntry::scored(
            "vote",
            format!("{} of {} agree on '{}'", votes, answers.len(), answers[winner].1),
            confidence,
        ));

        Ok(StrategyOutcome {
            result: answers.swap_remove(winner).0,
            confidence,
            trace,
            usage,
        })
    }
}
