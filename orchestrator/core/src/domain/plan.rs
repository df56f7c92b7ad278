// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Plan steps
//!
//! A [`PlanStep`] is one unit of the decomposed plan. Steps keep their
//! `position` for life; a human `modify` response produces a new revision at
//! the same position (see [`PlanStep::revise`]) instead of editing the step
//! in place, so every revision ever executed stays visible in the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::artifact::ArtifactType;
use crate::domain::checkpoint::CheckpointType;
use crate::domain::mission::MissionId;

pub const DEFAULT_STRATEGY: &str = "direct";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// When an approval gate fires relative to step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTiming {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalGate {
    #[serde(rename = "type")]
    pub checkpoint_type: CheckpointType,
    #[serde(default = "default_gate_timing")]
    pub timing: GateTiming,
}

fn default_gate_timing() -> GateTiming {
    GateTiming::Before
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPolicy {
    /// Fan out across every assigned agent and join the branches.
    #[serde(default)]
    pub parallel: bool,
    /// Number of agents to assign. Only meaningful for parallel steps.
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,
    /// Failure of a critical step fails the mission.
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub approval: Option<ApprovalGate>,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default, with = "humantime_serde")]
    pub branch_timeout: Option<Duration>,
    #[serde(default)]
    pub produces: Option<ArtifactType>,
}

fn default_fan_out() -> usize {
    1
}

fn default_strategy() -> String {
    DEFAULT_STRATEGY.to_string()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            parallel: false,
            fan_out: default_fan_out(),
            critical: false,
            approval: None,
            strategy: default_strategy(),
            max_attempts: default_max_attempts(),
            branch_timeout: None,
            produces: None,
        }
    }
}

/// One line of a strategy's reasoning trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage: String,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl TraceEntry {
    pub fn new(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            detail: detail.into(),
            score: None,
        }
    }

    pub fn scored(stage: impl Into<String>, detail: impl Into<String>, score: f64) -> Self {
        Self {
            stage: stage.into(),
            detail: detail.into(),
            score: Some(score),
        }
    }
}

/// Outcome of one branch of a fanned-out step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchOutcome {
    pub agent: AgentId,
    pub succeeded: bool,
    pub answer: Option<String>,
    pub confidence: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub output: String,
    pub confidence: f64,
    #[serde(default)]
    pub branches: Vec<BranchOutcome>,
    #[serde(default)]
    pub trace: Vec<TraceEntry>,
    /// Completed by a `skip` risk decision rather than by execution.
    #[serde(default)]
    pub skipped: bool,
}

impl StepResult {
    pub fn skipped() -> Self {
        Self {
            output: String::new(),
            confidence: 0.0,
            branches: Vec::new(),
            trace: Vec::new(),
            skipped: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: StepId,
    pub mission_id: MissionId,
    pub position: usize,
    pub revision: u32,
    pub supersedes: Option<StepId>,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub agents: Vec<AgentId>,
    #[serde(default)]
    pub policy: StepPolicy,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub status: StepStatus,
    pub attempts: u32,
    /// Set once a `before` approval gate has been passed.
    pub approved: bool,
    pub result: Option<StepResult>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PlanStep {
    pub fn primary_agent(&self) -> Option<&AgentId> {
        self.agents.first()
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempts < self.policy.max_attempts
    }

    /// Build the next revision of this step from a reviewer's patch.
    ///
    /// The new revision starts `pending` and pre-approved: the reviewer who
    /// wrote the patch has already signed off on it.
    pub fn revise(&self, patch: &StepPatch) -> PlanStep {
        let mut next = self.clone();
        next.id = StepId::new();
        next.revision = self.revision + 1;
        next.supersedes = Some(self.id);
        next.status = StepStatus::Pending;
        next.attempts = 0;
        next.approved = true;
        next.result = None;
        next.error = None;
        next.started_at = None;
        next.completed_at = None;

        if let Some(description) = &patch.description {
            next.description = description.clone();
        }
        if let Some(agents) = &patch.agents {
            next.agents = agents.clone();
        }
        if let Some(strategy) = &patch.strategy {
            next.policy.strategy = strategy.clone();
        }
        if let Some(timeout) = patch.branch_timeout {
            next.policy.branch_timeout = Some(timeout);
        }
        if let Some(parameters) = &patch.parameters {
            next.parameters = merge_parameters(&self.parameters, parameters);
        }
        next
    }
}

/// Shallow merge of JSON objects; non-object patches replace the base.
fn merge_parameters(base: &serde_json::Value, patch: &serde_json::Value) -> serde_json::Value {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            let mut merged = base.clone();
            for (key, value) in patch {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => patch.clone(),
    }
}

/// Edits a reviewer may apply through a `modify` checkpoint response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepPatch {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub agents: Option<Vec<AgentId>>,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub branch_timeout: Option<Duration>,
}

/// A step as produced by the plan generator, before ids and positions exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStepDraft {
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub fan_out: Option<usize>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub approval: Option<ApprovalGate>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Per-branch limit overriding the engine default, e.g. `"90s"`
    #[serde(default, with = "humantime_serde")]
    pub branch_timeout: Option<Duration>,
    #[serde(default)]
    pub produces: Option<ArtifactType>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl PlanStepDraft {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            capabilities: Vec::new(),
            parallel: false,
            fan_out: None,
            critical: false,
            approval: None,
            strategy: None,
            max_attempts: None,
            branch_timeout: None,
            produces: None,
            parameters: serde_json::Value::Null,
        }
    }

    pub fn into_step(
        self,
        mission_id: MissionId,
        position: usize,
        default_strategy: &str,
        default_max_attempts: u32,
    ) -> PlanStep {
        let fan_out = if self.parallel {
            self.fan_out.unwrap_or(1).max(1)
        } else {
            1
        };

        PlanStep {
            id: StepId::new(),
            mission_id,
            position,
            revision: 0,
            supersedes: None,
            description: self.description,
            capabilities: self.capabilities,
            agents: Vec::new(),
            policy: StepPolicy {
                parallel: self.parallel,
                fan_out,
                critical: self.critical,
                approval: self.approval,
                strategy: self
                    .strategy
                    .unwrap_or_else(|| default_strategy.to_string()),
                max_attempts: self.max_attempts.unwrap_or(default_max_attempts).max(1),
                branch_timeout: self.branch_timeout.filter(|timeout| !timeout.is_zero()),
                produces: self.produces,
            },
            parameters: self.parameters,
            status: StepStatus::Pending,
            attempts: 0,
            approved: false,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step() -> PlanStep {
        let mut draft = PlanStepDraft::new("Summarize the first document");
        draft.parameters = json!({"document": "a.pdf", "length": "short"});
        draft.into_step(MissionId::new(), 0, DEFAULT_STRATEGY, DEFAULT_MAX_ATTEMPTS)
    }

    #[test]
    fn test_revise_creates_new_revision() {
        let original = step();
        let patch = StepPatch {
            description: Some("Summarize the first document in French".into()),
            parameters: Some(json!({"length": "long"})),
            ..Default::default()
        };

        let revised = original.revise(&patch);

        assert_ne!(revised.id, original.id);
        assert_eq!(revised.revision, 1);
        assert_eq!(revised.supersedes, Some(original.id));
        assert_eq!(revised.position, original.position);
        assert_eq!(revised.status, StepStatus::Pending);
        assert!(revised.approved);
        assert_eq!(revised.parameters, json!({"document": "a.pdf", "length": "long"}));
        // Original untouched
        assert_eq!(original.description, "Summarize the first document");
    }

    #[test]
    fn test_sequential_draft_ignores_fan_out() {
        let mut draft = PlanStepDraft::new("Compare sources");
        draft.fan_out = Some(3);
        let step = draft.into_step(MissionId::new(), 2, "debate", 3);
        assert_eq!(step.policy.fan_out, 1);
        assert_eq!(step.policy.strategy, "debate");
        assert_eq!(step.policy.max_attempts, 3);
    }

    #[test]
    fn test_branch_timeout_from_draft_and_patch() {
        let draft: PlanStepDraft = serde_json::from_value(json!({
            "description": "Crawl the site",
            "branch_timeout": "90s"
        }))
        .unwrap();
        let step = draft.into_step(MissionId::new(), 0, DEFAULT_STRATEGY, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(step.policy.branch_timeout, Some(Duration::from_secs(90)));

        let patch: StepPatch = serde_json::from_value(json!({"branch_timeout": "5m"})).unwrap();
        let revised = step.revise(&patch);
        assert_eq!(revised.policy.branch_timeout, Some(Duration::from_secs(300)));

        let untouched = revised.revise(&StepPatch::default());
        assert_eq!(untouched.policy.branch_timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let parsed: Result<StepPatch, _> = serde_json::from_value(json!({"position": 4}));
        assert!(parsed.is_err());
    }
}
