// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Adversarial debate.
//!
//! A proposer opens with an answer, then each round the critic attacks the
//! current proposal and the proposer answers the critique. A judge reads the
//! final positions and replies with `WINNER: proposer|critic`, an optional
//! `CONFIDENCE: x` line and a justification. A verdict that names no winner
//! keeps the proposal.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use super::{ReasoningStrategy, StrategyContext, StrategyError, StrategyInput, StrategyOutcome};
use crate::domain::llm::TokenUsage;
use crate::domain::plan::TraceEntry;

pub const PROPOSE_MARKER: &str = "Propose an answer to the task";
pub const CRITIC_MARKER: &str = "Argue against the current proposal";
pub const REBUT_MARKER: &str = "Answer the critique and improve the proposal";
pub const JUDGE_MARKER: &str = "Decide which side argued better";

const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Proposer,
    Critic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub winner: Side,
    pub confidence: f64,
}

pub struct DebateStrategy {
    rounds: usize,
}

impl DebateStrategy {
    pub fn new(rounds: usize) -> Self {
        Self { rounds }
    }
}

pub(crate) fn parse_verdict(text: &str) -> Verdict {
    static WINNER: OnceLock<Option<Regex>> = OnceLock::new();
    static CONFIDENCE: OnceLock<Option<Regex>> = OnceLock::new();

    let winner = WINNER
        .get_or_init(|| Regex::new(r"(?im)^\s*winner\s*:\s*(proposer|critic)\b").ok())
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| {
            if m.as_str().eq_ignore_ascii_case("critic") {
                Side::Critic
            } else {
                Side::Proposer
            }
        })
        .unwrap_or(Side::Proposer);

    let confidence = CONFIDENCE
        .get_or_init(|| Regex::new(r"(?im)^\s*confidence\s*:\s*(-?\d+(?:\.\d+)?)").ok())
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE);

    Verdict { winner, confidence }
}

#[async_trait]
impl ReasoningStrategy for DebateStrategy {
    fn name(&self) -> &str {
        "debate"
    }

    async fn run(
        &self,
        input: &StrategyInput,
        context: &StrategyContext,
    ) -> Result<StrategyOutcome, StrategyError> {
        let task = &input.prompt;
        let mut usage = TokenUsage::default();
        let mut trace = Vec::new();

        let mut proposal = context
            .generate(&format!("{PROPOSE_MARKER}.\n\nTask:\n{task}"), None, &mut usage)
            .await?;
        trace.push(TraceEntry::new("proposer 0", proposal.clone()));
        let mut critique: Option<String> = None;

        for round in 1..=self.rounds {
            let attack = context
                .generate(
                    &format!(
                        "{CRITIC_MARKER}. Point out errors, gaps and a better alternative if one exists.\n\nTask:\n{task}\n\nProposal:\n{proposal}"
                    ),
                    None,
                    &mut usage,
                )
                .await?;
            trace.push(TraceEntry::new(format!("critic {round}"), attack.clone()));

            proposal = context
                .generate(
                    &format!(
                        "{REBUT_MARKER}.\n\nTask:\n{task}\n\nYour proposal:\n{proposal}\n\nCritique:\n{attack}"
                    ),
                    None,
                    &mut usage,
                )
                .await?;
            trace.push(TraceEntry::new(format!("proposer {round}"), proposal.clone()));
            critique = Some(attack);
        }

        let judgement = context
            .generate(
                &format!(
                    "{JUDGE_MARKER}.\n\nTask:\n{task}\n\nProposer:\n{proposal}\n\nCritic:\n{}\n\nReply with WINNER: proposer or WINNER: critic, then CONFIDENCE: <0-1>, then a one paragraph justification.",
                    critique.as_deref().unwrap_or("(no critique)")
                ),
                Some(0.0),
                &mut usage,
            )
            .await?;
        let verdict = parse_verdict(&judgement);
        debug!(winner = ?verdict.winner, confidence = verdict.confidence, "Debate judged");
        trace.push(TraceEntry::scored("judge", judgement, verdict.confidence));

        let result = match (verdict.winner, critique) {
            (Side::Critic, Some(critique)) => critique,
            _ => proposal,
        };

        Ok(StrategyOutcome {
            result,
            confidence: verdict.confidence,
            trace,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{context, Canned};
    use super::*;
    use crate::domain::llm::ProviderError;

    #[test]
    fn test_parse_verdict() {
        assert_eq!(
            parse_verdict("WINNER: critic\nCONFIDENCE: 0.8\nThe critic found the flaw."),
            Verdict {
                winner: Side::Critic,
                confidence: 0.8
            }
        );
        assert_eq!(
            parse_verdict("winner: Proposer\nBoth made fair points."),
            Verdict {
                winner: Side::Proposer,
                confidence: 0.5
            }
        );
        assert_eq!(parse_verdict("undecided").winner, Side::Proposer);
    }

    fn debate_provider(verdict: &str) -> Canned {
        Canned::new()
            .on(JUDGE_MARKER, &[verdict])
            .on(CRITIC_MARKER, &["critic round one", "critic round two"])
            .on(REBUT_MARKER, &["proposal v1", "proposal v2"])
            .on(PROPOSE_MARKER, &["proposal v0"])
    }

    #[tokio::test]
    async fn test_proposer_win_returns_final_proposal() {
        let (provider, ctx) = context(debate_provider("WINNER: proposer\nCONFIDENCE: 0.7\nSound."));

        let outcome = DebateStrategy::new(2)
            .run(&StrategyInput::new("Choose a database"), &ctx)
            .await
            .unwrap();

        assert_eq!(outcome.result, "proposal v2");
        assert_eq!(outcome.confidence, 0.7);
        // opening + 2 x (critic, rebuttal) + judge
        assert_eq!(provider.calls(), 6);
        let stages: Vec<_> = outcome.trace.iter().map(|t| t.stage.as_str()).collect();
        assert_eq!(
            stages,
            vec!["proposer 0", "critic 1", "proposer 1", "critic 2", "proposer 2", "judge"]
        );
    }

    #[tokio::test]
    async fn test_critic_win_returns_last_critique() {
        let (_, ctx) = context(debate_provider("WINNER: critic\nThe proposal ignores cost."));

        let outcome = DebateStrategy::new(2)
            .run(&StrategyInput::new("Choose a database"), &ctx)
            .await
            .unwrap();

        assert_eq!(outcome.result, "critic round two");
        assert_eq!(outcome.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_failed_judge_keeps_earlier_usage_on_meter() {
        let provider = Canned::new()
            .fail_on(JUDGE_MARKER, ProviderError::Authentication("revoked".into()))
            .on(CRITIC_MARKER, &["critic round one", "critic round two"])
            .on(REBUT_MARKER, &["proposal v1", "proposal v2"])
            .on(PROPOSE_MARKER, &["proposal v0"]);
        let (provider, ctx) = context(provider);

        let err = DebateStrategy::new(2)
            .run(&StrategyInput::new("Choose a database"), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, StrategyError::Provider { .. }));
        assert_eq!(provider.calls(), 6);
        // Five answered calls at 0.01 each; the judge failure reports nothing
        assert!((ctx.meter.total().cost - 0.05).abs() < 1e-9);
    }
}
