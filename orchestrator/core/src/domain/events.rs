// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Mission Events
//!
//! The append-only log every mission state is derived from. Events are
//! write-once facts; each carries a per-mission `sequence` starting at 1 that
//! doubles as the mission's optimistic-concurrency version.
//!
//! Event kinds fall into two groups:
//!
//! | Group | Kinds |
//! |-------|-------|
//! | Observer-facing | `mission_started`, `step_started`, `step_completed`, `checkpoint_raised`, `checkpoint_resolved`, `artifact_produced`, `mission_completed`, `mission_failed` |
//! | Bookkeeping | `mission_submitted`, `briefing_started`, `plan_generated`, `mission_ready`, `step_assigned`, `step_failed`, `step_requeued`, `step_approved`, `step_revised`, `step_skipped`, `mission_paused`, `mission_resumed`, `mission_aborted` |
//!
//! Both groups are published on the event stream; observers that only care
//! about the first group filter on [`MissionEventKind::event_type`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::artifact::{ArtifactId, MissionArtifact};
use crate::domain::checkpoint::{Checkpoint, CheckpointId, CheckpointResponse, CheckpointStatus};
use crate::domain::mission::{MissionId, MissionMode};
use crate::domain::plan::{PlanStep, StepId, StepResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope stored in the event log and delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionEvent {
    pub id: EventId,
    pub mission_id: MissionId,
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
    pub kind: MissionEventKind,
}

impl MissionEvent {
    pub fn new(mission_id: MissionId, sequence: u64, kind: MissionEventKind) -> Self {
        Self {
            id: EventId::new(),
            mission_id,
            sequence,
            occurred_at: Utc::now(),
            kind,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MissionEventKind {
    MissionSubmitted {
        objective: String,
        mode: MissionMode,
        budget_limit: f64,
        seed: u64,
        #[serde(default)]
        user_context: serde_json::Value,
    },
    BriefingStarted,
    PlanGenerated {
        steps: Vec<PlanStep>,
        /// Steps no candidate agent could cover; already marked failed.
        #[serde(default)]
        unassigned: Vec<StepId>,
        cost: f64,
    },
    MissionReady,
    MissionStarted,
    StepAssigned {
        step_id: StepId,
        agents: Vec<AgentId>,
    },
    StepStarted {
        step_id: StepId,
        attempt: u32,
    },
    StepCompleted {
        step_id: StepId,
        result: StepResult,
        cost: f64,
    },
    StepFailed {
        step_id: StepId,
        error: String,
        cost: f64,
    },
    StepRequeued {
        step_id: StepId,
        reason: String,
        #[serde(default)]
        reset_attempts: bool,
        /// Spent by the interrupted attempt
        #[serde(default)]
        cost: f64,
    },
    StepApproved {
        step_id: StepId,
    },
    StepRevised {
        supersedes: StepId,
        step: PlanStep,
    },
    StepSkipped {
        step_id: StepId,
        reason: String,
    },
    CheckpointRaised {
        checkpoint: Checkpoint,
    },
    CheckpointResolved {
        checkpoint_id: CheckpointId,
        status: CheckpointStatus,
        response: CheckpointResponse,
    },
    ArtifactProduced {
        artifact: MissionArtifact,
    },
    MissionPaused,
    MissionResumed,
    MissionCompleted {
        synthesis: ArtifactId,
    },
    MissionFailed {
        reason: String,
        last_completed_step: Option<StepId>,
        last_checkpoint: Option<CheckpointId>,
    },
    MissionAborted {
        reason: String,
        last_completed_step: Option<StepId>,
    },
}

impl MissionEventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MissionSubmitted { .. } => "mission_submitted",
            Self::BriefingStarted => "briefing_started",
            Self::PlanGenerated { .. } => "plan_generated",
            Self::MissionReady => "mission_ready",
            Self::MissionStarted => "mission_started",
            Self::StepAssigned { .. } => "step_assigned",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::StepRequeued { .. } => "step_requeued",
            Self::StepApproved { .. } => "step_approved",
            Self::StepRevised { .. } => "step_revised",
            Self::StepSkipped { .. } => "step_skipped",
            Self::CheckpointRaised { .. } => "checkpoint_raised",
            Self::CheckpointResolved { .. } => "checkpoint_resolved",
            Self::ArtifactProduced { .. } => "artifact_produced",
            Self::MissionPaused => "mission_paused",
            Self::MissionResumed => "mission_resumed",
            Self::MissionCompleted { .. } => "mission_completed",
            Self::MissionFailed { .. } => "mission_failed",
            Self::MissionAborted { .. } => "mission_aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MissionCompleted { .. } | Self::MissionFailed { .. } | Self::MissionAborted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = MissionEvent::new(MissionId::new(), 1, MissionEventKind::MissionStarted);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["type"], "mission_started");
        assert_eq!(json["sequence"], 1);

        let back: MissionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(MissionEventKind::MissionAborted {
            reason: "operator".into(),
            last_completed_step: None
        }
        .is_terminal());
        assert!(!MissionEventKind::MissionPaused.is_terminal());
    }
}
