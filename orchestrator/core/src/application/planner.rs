// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Plan Generator
//!
//! Turns a free-text objective into ordered [`PlanStepDraft`]s. The planner
//! provider is asked, through the configured planning strategy, for a JSON
//! document `{"steps": [...]}`; the JSON may be fenced in markdown or embedded
//! in prose. When nothing usable comes back the objective is split
//! heuristically, so a reachable provider always yields at least one step.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::strategies::{
    derive_seed, StrategyContext, StrategyError, StrategyInput, StrategyRegistry,
};
use crate::domain::llm::TokenUsage;
use crate::domain::plan::{PlanStepDraft, DEFAULT_MAX_ATTEMPTS, DEFAULT_STRATEGY};
use crate::infrastructure::llm::ProviderRegistry;

/// Branch index reserved for the planning run in seed derivation.
const PLANNING_BRANCH: usize = usize::MAX;

#[derive(Debug, Clone, PartialEq)]
pub struct PlanConstraints {
    pub max_steps: usize,
    pub default_strategy: String,
    pub default_max_attempts: u32,
    /// Strategy names a step may request
    pub strategies: Vec<String>,
    /// Capabilities offered by the configured agents
    pub capabilities: Vec<String>,
}

impl Default for PlanConstraints {
    fn default() -> Self {
        Self {
            max_steps: 8,
            default_strategy: DEFAULT_STRATEGY.to_string(),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            strategies: vec![DEFAULT_STRATEGY.to_string()],
            capabilities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    /// Parsed from the planner's JSON
    Model,
    /// Split from the objective text
    Heuristic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedPlan {
    pub drafts: Vec<PlanStepDraft>,
    pub usage: TokenUsage,
    pub source: PlanSource,
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("No reasoning provider is available for planning")]
    NoProvider,

    #[error("Planning failed: {0}")]
    Strategy(#[from] StrategyError),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanDocument {
    Wrapped { steps: Vec<PlanStepDraft> },
    Bare(Vec<PlanStepDraft>),
}

pub struct PlanGenerator {
    providers: Arc<ProviderRegistry>,
    strategies: Arc<StrategyRegistry>,
    planner_provider: Option<String>,
    planning_strategy: String,
}

impl PlanGenerator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        strategies: Arc<StrategyRegistry>,
        planner_provider: Option<String>,
        planning_strategy: impl Into<String>,
    ) -> Self {
        Self {
            providers,
            strategies,
            planner_provider,
            planning_strategy: planning_strategy.into(),
        }
    }

    pub async fn generate_plan(
        &self,
        objective: &str,
        constraints: &PlanConstraints,
        seed: u64,
    ) -> Result<GeneratedPlan, PlanError> {
        let (provider_name, provider) = self
            .providers
            .resolve(self.planner_provider.as_deref())
            .ok_or(PlanError::NoProvider)?;
        let strategy = self.strategies.get(&self.planning_strategy)?;

        let context = StrategyContext::new(
            provider_name.clone(),
            provider,
            derive_seed(seed, 0, 0, PLANNING_BRANCH),
            self.strategies.clone(),
        );
        let input = StrategyInput::new(planning_prompt(objective, constraints));
        let outcome = strategy.run(&input, &context).await?;
        let usage = context.meter.total();

        let parsed = parse_plan(&outcome.result, constraints);
        let (drafts, source) = if parsed.is_empty() {
            warn!(
                provider = %provider_name,
                "Planner response held no usable plan, splitting objective instead"
            );
            (heuristic_plan(objective, constraints), PlanSource::Heuristic)
        } else {
            (parsed, PlanSource::Model)
        };

        info!(
            provider = %provider_name,
            steps = drafts.len(),
            source = ?source,
            cost = usage.cost,
            "Plan generated"
        );
        Ok(GeneratedPlan {
            drafts,
            usage,
            source,
        })
    }
}

fn planning_prompt(objective: &str, constraints: &PlanConstraints) -> String {
    let capabilities = if constraints.capabilities.is_empty() {
        "(any)".to_string()
    } else {
        constraints.capabilities.join(", ")
    };
    format!(
        r#"Break the objective below into at most {max} ordered steps.

Objective:
{objective}

Reply with JSON only, in the form
{{"steps": [{{"description": "...", "capabilities": ["..."], "parallel": false, "fan_out": 1, "critical": false, "strategy": "{default}"}}]}}

Available strategies: {strategies}
Available capabilities: {capabilities}
Mark a step parallel only when independent agents should attempt it concurrently."#,
        max = constraints.max_steps,
        default = constraints.default_strategy,
        strategies = constraints.strategies.join(", "),
    )
}

/// JSON payload of a model reply: a fenced block if present, otherwise the
/// outermost braces or brackets.
pub fn extract_json(text: &str) -> Option<String> {
    let start_marker = "```json";
    if let Some(start) = text.find(start_marker) {
        let content_start = start + start_marker.len();
        if let Some(end_offset) = text[content_start..].find("```") {
            return Some(text[content_start..content_start + end_offset].trim().to_string());
        }
    }

    let generic_marker = "```";
    if let Some(start) = text.find(generic_marker) {
        let content_start = start + generic_marker.len();
        if let Some(end_offset) = text[content_start..].find("```") {
            return Some(text[content_start..content_start + end_offset].trim().to_string());
        }
    }

    let (open, close) = match (text.find('{'), text.find('[')) {
        (Some(brace), Some(bracket)) if bracket < brace => ('[', ']'),
        (Some(_), _) => ('{', '}'),
        (None, Some(_)) => ('[', ']'),
        (None, None) => return None,
    };
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| text[start..=end].to_string())
}

/// Drafts from a planner reply, sanitized against `constraints`.
pub fn parse_plan(text: &str, constraints: &PlanConstraints) -> Vec<PlanStepDraft> {
    let Some(json) = extract_json(text) else {
        return Vec::new();
    };
    let document: PlanDocument = match serde_json::from_str(&json) {
        Ok(document) => document,
        Err(e) => {
            debug!(error = %e, "Planner JSON did not match the plan schema");
            return Vec::new();
        }
    };
    let drafts = match document {
        PlanDocument::Wrapped { steps } | PlanDocument::Bare(steps) => steps,
    };

    drafts
        .into_iter()
        .filter(|draft| !draft.description.trim().is_empty())
        .take(constraints.max_steps.max(1))
        .map(|mut draft| {
            draft.description = draft.description.trim().to_string();
            if let Some(strategy) = &draft.strategy {
                if !constraints.strategies.iter().any(|known| known == strategy) {
                    warn!(
                        strategy = %strategy,
                        fallback = %constraints.default_strategy,
                        "Planner requested unknown strategy"
                    );
                    draft.strategy = None;
                }
            }
            draft
        })
        .collect()
}

/// Split on newlines, `;` and ` then `; never empty for a non-empty objective.
pub fn heuristic_plan(objective: &str, constraints: &PlanConstraints) -> Vec<PlanStepDraft> {
    let mut parts: Vec<String> = Vec::new();
    for line in objective.split(['\n', ';']) {
        let mut rest = line;
        while let Some(idx) = rest.to_ascii_lowercase().find(" then ") {
            parts.push(rest[..idx].to_string());
            rest = &rest[idx + " then ".len()..];
        }
        parts.push(rest.to_string());
    }

    let mut drafts: Vec<PlanStepDraft> = parts
        .iter()
        .map(|part| {
            part.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '-' | '*' | '.' | ')'))
                .trim()
        })
        .filter(|part| !part.is_empty())
        .take(constraints.max_steps.max(1))
        .map(PlanStepDraft::new)
        .collect();

    if drafts.is_empty() {
        drafts.push(PlanStepDraft::new(objective.trim()));
    }
    drafts
}
