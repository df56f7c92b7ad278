// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::agent::{AgentId, AgentProfile};
use crate::domain::plan::{PlanStep, StepId};

/// Result of team assembly: who works each step, and which steps nobody can.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamAssignment {
    pub assignments: BTreeMap<StepId, Vec<AgentId>>,
    pub unassigned: Vec<StepId>,
}

/// Matches plan steps to configured agents.
///
/// An agent is eligible for a step when it covers every capability the step
/// requires. Eligible agents are ranked by keyword affinity with the step
/// description (higher first), then recent error rate, then average cost,
/// then id, and the step takes the top `fan_out` of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeamAssembler;

impl TeamAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble_team(&self, steps: &[PlanStep], candidates: &[AgentProfile]) -> TeamAssignment {
        let mut team = TeamAssignment::default();
        for step in steps {
            let chosen = self.select(step, candidates);
            if chosen.is_empty() {
                team.unassigned.push(step.id);
            } else {
                team.assignments.insert(step.id, chosen);
            }
        }
        team
    }

    /// Top `fan_out` eligible agents for one step.
    pub fn select(&self, step: &PlanStep, candidates: &[AgentProfile]) -> Vec<AgentId> {
        self.rank(step, candidates)
            .into_iter()
            .take(step.policy.fan_out.max(1))
            .map(|agent| agent.id.clone())
            .collect()
    }

    pub fn rank<'a>(&self, step: &PlanStep, candidates: &'a [AgentProfile]) -> Vec<&'a AgentProfile> {
        let words = keywords(&step.description);
        let mut eligible: Vec<(usize, &AgentProfile)> = candidates
            .iter()
            .filter(|agent| {
                step.capabilities
                    .iter()
                    .all(|capability| agent.has_capability(capability))
            })
            .map(|agent| (affinity(agent, &words), agent))
            .collect();

        eligible.sort_by(|(a_affinity, a), (b_affinity, b)| {
            b_affinity
                .cmp(a_affinity)
                .then_with(|| a.recent_error_rate.total_cmp(&b.recent_error_rate))
                .then_with(|| a.average_cost.total_cmp(&b.average_cost))
                .then_with(|| a.id.cmp(&b.id))
        });
        eligible.into_iter().map(|(_, agent)| agent).collect()
    }
}

fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Description words found among the agent's capabilities or id.
fn affinity(agent: &AgentProfile, words: &BTreeSet<String>) -> usize {
    let mut vocabulary = keywords(agent.id.as_str());
    for capability in &agent.capabilities {
        vocabulary.extend(keywords(capability));
    }
    words
        .iter()
        .filter(|word| {
            vocabulary
                .iter()
                .any(|known| word.starts_with(known.as_str()) || known.starts_with(word.as_str()))
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mission::MissionId;
    use crate::domain::plan::PlanStepDraft;

    fn agent(id: &str, capabilities: &[&str], error_rate: f64, cost: f64) -> AgentProfile {
        AgentProfile::new(AgentId::new(id).unwrap(), "local")
            .with_capabilities(capabilities.iter().copied())
            .with_stats(error_rate, cost)
    }

    fn step(description: &str, capabilities: &[&str], fan_out: Option<usize>) -> PlanStep {
        let mut draft = PlanStepDraft::new(description);
        draft.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        draft.parallel = fan_out.is_some();
        draft.fan_out = fan_out;
        draft.into_step(MissionId::new(), 0, "direct", 2)
    }

    #[test]
    fn test_ties_prefer_low_error_rate_then_cost() {
        let candidates = vec![
            agent("c", &["research"], 0.10, 0.01),
            agent("b", &["research"], 0.05, 0.03),
            agent("a", &["research"], 0.05, 0.02),
        ];
        let step = step("Gather sources", &["research"], None);

        let ranked: Vec<_> = TeamAssembler
            .rank(&step, &candidates)
            .into_iter()
            .map(|agent| agent.id.as_str())
            .collect();
        assert_eq!(ranked, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_affinity_outranks_error_rate() {
        let candidates = vec![
            agent("generalist", &["write"], 0.0, 0.0),
            agent("summarizer", &["write", "summarize"], 0.2, 0.1),
        ];
        let step = step("Summarize the report", &["write"], None);
        assert_eq!(
            TeamAssembler.select(&step, &candidates),
            vec![AgentId::new("summarizer").unwrap()]
        );
    }

    #[test]
    fn test_fan_out_and_unassigned_steps() {
        let candidates = vec![
            agent("r1", &["research"], 0.0, 0.0),
            agent("r2", &["research"], 0.1, 0.0),
            agent("w1", &["write"], 0.0, 0.0),
        ];
        let parallel = step("Cross-check figures", &["research"], Some(3));
        let orphan = step("Translate to Japanese", &["translate"], None);

        let team = TeamAssembler::new().assemble_team(&[parallel.clone(), orphan.clone()], &candidates);

        assert_eq!(team.assignments[&parallel.id].len(), 2);
        assert_eq!(team.unassigned, vec![orphan.id]);
    }
}
