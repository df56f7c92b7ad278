// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Mission Aggregate
//!
//! A [`Mission`] is a single goal-directed, multi-step execution. It owns its
//! ordered plan, the set of assigned agents, and its budget ledger.
//!
//! The aggregate is never mutated directly by application code. Every change
//! is expressed as a [`MissionEventKind`](crate::domain::events::MissionEventKind)
//! and folded in by [`MissionProjection`](crate::domain::projection::MissionProjection),
//! so the struct here is effectively the materialized view of the event log.
//!
//! ## Lifecycle
//!
//! ```text
//! draft ─▶ briefing ─▶ ready ─▶ running ─▶ completed
//!             │                  │  ▲
//!             ▼                  ▼  │
//!         checkpoint ◀──────── paused / checkpoint
//!
//! failed / aborted reachable from every non-terminal state
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::checkpoint::CheckpointId;
use crate::domain::plan::{PlanStep, StepId, StepStatus};

// ============================================================================
// Identity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MissionId(pub Uuid);

impl MissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MissionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ============================================================================
// Mode
// ============================================================================

/// How much human oversight a mission runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissionMode {
    InteractiveManual,
    InteractiveAutomatic,
    AutonomousManual,
    AutonomousAutomatic,
}

impl MissionMode {
    /// Interactive missions stop after planning for a `plan-approval` checkpoint.
    pub fn requires_plan_approval(&self) -> bool {
        matches!(self, Self::InteractiveManual | Self::InteractiveAutomatic)
    }

    /// Manual missions honour approval gates declared on individual steps.
    pub fn honors_step_gates(&self) -> bool {
        matches!(self, Self::InteractiveManual | Self::AutonomousManual)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InteractiveManual => "interactive-manual",
            Self::InteractiveAutomatic => "interactive-automatic",
            Self::AutonomousManual => "autonomous-manual",
            Self::AutonomousAutomatic => "autonomous-automatic",
        }
    }
}

impl fmt::Display for MissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "interactive-manual" => Ok(Self::InteractiveManual),
            "interactive-automatic" => Ok(Self::InteractiveAutomatic),
            "autonomous-manual" => Ok(Self::AutonomousManual),
            "autonomous-automatic" => Ok(Self::AutonomousAutomatic),
            other => Err(format!("unknown mission mode '{}'", other)),
        }
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Draft,
    Briefing,
    Ready,
    Running,
    Paused,
    Checkpoint,
    Completed,
    Failed,
    Aborted,
}

impl MissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// `advance` performs no work while the mission sits in one of these.
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Paused | Self::Checkpoint)
    }

    /// Transition table for the mission lifecycle.
    ///
    /// `failed` and `aborted` are reachable from every non-terminal state.
    /// A checkpoint may be raised during `briefing` (plan approval) or
    /// `running` (step gates, risk decisions); resolving it returns to the
    /// status recorded on the checkpoint, which is `ready` or `running`.
    pub fn can_transition_to(&self, next: MissionStatus) -> bool {
        use MissionStatus::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Aborted) {
            return true;
        }

        matches!(
            (self, next),
            (Draft, Briefing)
                | (Briefing, Ready)
                | (Briefing, Checkpoint)
                | (Ready, Running)
                | (Ready, Checkpoint)
                | (Running, Checkpoint)
                | (Running, Paused)
                | (Running, Completed)
                | (Paused, Running)
                | (Checkpoint, Running)
                | (Checkpoint, Ready)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Briefing => "briefing",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Checkpoint => "checkpoint",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Aggregate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: MissionId,
    pub objective: String,
    pub mode: MissionMode,
    pub status: MissionStatus,
    /// Active revision of every plan position, ordered by position.
    pub steps: Vec<PlanStep>,
    /// Revisions replaced by a `modify` checkpoint response.
    #[serde(default)]
    pub step_history: Vec<PlanStep>,
    pub assigned_agents: BTreeSet<AgentId>,
    pub budget_limit: f64,
    pub budget_spent: f64,
    /// Root seed for every strategy run in this mission.
    pub seed: u64,
    #[serde(default)]
    pub user_context: serde_json::Value,
    /// Sequence number of the last event folded into this snapshot.
    pub version: u64,
    pub pending_checkpoint: Option<CheckpointId>,
    /// Last failure or abort reason, surfaced to observers.
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    /// Index of the first step that still needs work.
    ///
    /// Steps are executed strictly in position order, so this is the
    /// resumable cursor persisted (implicitly) through the event log.
    pub fn cursor(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|step| step.status != StepStatus::Completed)
    }

    pub fn current_step(&self) -> Option<&PlanStep> {
        self.cursor().map(|idx| &self.steps[idx])
    }

    pub fn step(&self, id: StepId) -> Option<&PlanStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn step_mut(&mut self, id: StepId) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|step| step.id == id)
    }

    pub fn last_completed_step(&self) -> Option<StepId> {
        self.steps
            .iter()
            .rev()
            .find(|step| step.status == StepStatus::Completed)
            .map(|step| step.id)
    }

    pub fn all_steps_completed(&self) -> bool {
        !self.steps.is_empty() && self.cursor().is_none()
    }

    pub fn budget_remaining(&self) -> f64 {
        (self.budget_limit - self.budget_spent).max(0.0)
    }

    /// A step may only start while spending is within the limit.
    pub fn within_budget(&self) -> bool {
        self.budget_spent <= self.budget_limit
    }
}
