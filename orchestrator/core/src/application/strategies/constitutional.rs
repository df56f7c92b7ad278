// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Constitutional self-critique.
//!
//! Draft, critique the draft against the rule set, and revise while the
//! critique reports violations, for at most `max_revisions` rounds. The
//! critique is expected to answer `OK` or one `VIOLATION: <rule-id>: <reason>`
//! line per broken rule; ids outside the rule set are ignored.

use async_trait::async_trait;
use tracing::debug;

use super::{ReasoningStrategy, StrategyContext, StrategyError, StrategyInput, StrategyOutcome};
use crate::domain::engine_config::{ConstitutionRule, ConstitutionalSettings};
use crate::domain::llm::TokenUsage;
use crate::domain::plan::TraceEntry;

pub const CRITIQUE_MARKER: &str = "Review the response against each rule";
pub const REVISE_MARKER: &str = "Rewrite the response so that it satisfies every rule";

pub struct ConstitutionalStrategy {
    settings: ConstitutionalSettings,
}

impl ConstitutionalStrategy {
    pub fn new(settings: ConstitutionalSettings) -> Self {
        Self { settings }
    }

    fn rules_block(&self) -> String {
        self.settings
            .rules
            .iter()
            .map(|rule| format!("- {}: {}", rule.id, rule.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn critique_prompt(&self, task: &str, draft: &str) -> String {
        format!(
            "{CRITIQUE_MARKER}.\n\nRules:\n{}\n\nTask:\n{task}\n\nResponse:\n{draft}\n\nReply OK if no rule is broken, otherwise one line per broken rule in the form VIOLATION: <rule-id>: <reason>.",
            self.rules_block()
        )
    }

    fn revise_prompt(&self, task: &str, draft: &str, violations: &[(String, String)]) -> String {
        let issues = violations
            .iter()
            .map(|(id, reason)| format!("- {id}: {reason}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{REVISE_MARKER}.\n\nRules:\n{}\n\nTask:\n{task}\n\nResponse:\n{draft}\n\nProblems found:\n{issues}",
            self.rules_block()
        )
    }

    /// `(rule id, reason)` for each distinct known rule the critique flags.
    fn parse_violations(&self, critique: &str) -> Vec<(String, String)> {
        let mut found: Vec<(String, String)> = Vec::new();
        for line in critique.lines() {
            let line = line.trim();
            let Some(rest) = line
                .get(..10)
                .filter(|prefix| prefix.eq_ignore_ascii_case("violation:"))
                .map(|_| &line[10..])
            else {
                continue;
            };
            let mut parts = rest.splitn(2, ':');
            let id = parts.next().unwrap_or_default().trim();
            let reason = parts.next().unwrap_or_default().trim();
            let known = self
                .settings
                .rules
                .iter()
                .any(|rule: &ConstitutionRule| rule.id.eq_ignore_ascii_case(id));
            if known && !found.iter().any(|(existing, _)| existing.eq_ignore_ascii_case(id)) {
                found.push((id.to_string(), reason.to_string()));
            }
        }
        found
    }
}

#[async_trait]
impl ReasoningStrategy for ConstitutionalStrategy {
    fn name(&self) -> &str {
        "constitutional"
    }

    async fn run(
        &self,
        input: &StrategyInput,
        context: &StrategyContext,
    ) -> Result<StrategyOutcome, StrategyError> {
        let mut usage = TokenUsage::default();
        let mut trace = Vec::new();

        let mut draft = context.generate(&input.prompt, None, &mut usage).await?;
        trace.push(TraceEntry::new("draft", draft.clone()));

        let mut violations = Vec::new();
        for round in 0..=self.settings.max_revisions {
            let critique = context
                .generate(&self.critique_prompt(&input.prompt, &draft), Some(0.0), &mut usage)
                .await?;
            violations = self.parse_violations(&critique);
            trace.push(TraceEntry::new(
                format!("critique {round}"),
                if violations.is_empty() {
                    "OK".to_string()
                } else {
                    violations
                        .iter()
                        .map(|(id, _)| id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                },
            ));

            if violations.is_empty() || round == self.settings.max_revisions {
                break;
            }

            debug!(round, violations = violations.len(), "Revising draft");
            draft = context
                .generate(
                    &self.revise_prompt(&input.prompt, &draft, &violations),
                    None,
                    &mut usage,
                )
                .await?;
            trace.push(TraceEntry::new(format!("revision {}", round + 1), draft.clone()));
        }

        let total = self.settings.rules.len().max(1) as f64;
        let confidence = (1.0 - violations.len() as f64 / total).clamp(0.0, 1.0);

        Ok(StrategyOutcome {
            result: draft,
            confidence,
            trace,
            usage,
        })
    }
}
