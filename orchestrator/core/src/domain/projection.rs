// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Mission Projection
//!
//! Folds the [`MissionEvent`] log into the current mission state. This is the
//! only code that changes a [`Mission`]; application services decide which
//! events to append, and the projection decides what they mean.
//!
//! Applying an event validates it against the state it lands on (transition
//! table, step existence, checkpoint invariants). Services apply candidate
//! events to a scratch copy before appending, so an invalid event never
//! reaches the store.

use std::collections::BTreeSet;

use crate::domain::artifact::MissionArtifact;
use crate::domain::checkpoint::{Checkpoint, CheckpointId, CheckpointStatus};
use crate::domain::events::{MissionEvent, MissionEventKind};
use crate::domain::mission::{Mission, MissionId, MissionStatus};
use crate::domain::plan::{StepId, StepResult, StepStatus};

pub const UNASSIGNED_ERROR: &str = "no candidate agent covers the required capabilities";

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MissionProjection {
    pub mission: Mission,
    /// Every checkpoint ever raised, in creation order.
    pub checkpoints: Vec<Checkpoint>,
    pub artifacts: Vec<MissionArtifact>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProjectionError {
    #[error("Event log is empty")]
    EmptyLog,

    #[error("First event must be mission_submitted, found {0}")]
    NotSubmitted(&'static str),

    #[error("Mission {0} was already submitted")]
    AlreadySubmitted(MissionId),

    #[error("Event belongs to mission {found}, expected {expected}")]
    MissionMismatch { expected: MissionId, found: MissionId },

    #[error("Event sequence {found} out of order, expected {expected}")]
    OutOfOrder { expected: u64, found: u64 },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: MissionStatus, to: MissionStatus },

    #[error("Step {0} not found in active plan")]
    UnknownStep(StepId),

    #[error("Step {step_id} cannot accept {event} while {status:?}")]
    InvalidStepState {
        step_id: StepId,
        status: StepStatus,
        event: &'static str,
    },

    #[error("Checkpoint {0} not found")]
    UnknownCheckpoint(CheckpointId),

    #[error("Checkpoint {0} is already pending")]
    CheckpointAlreadyPending(CheckpointId),

    #[error("Checkpoint {0} is already resolved")]
    CheckpointAlreadyResolved(CheckpointId),

    #[error("Mission cannot complete with unfinished steps")]
    IncompletePlan,
}

impl MissionProjection {
    /// Rebuild state from a complete, ordered event log.
    pub fn replay(events: &[MissionEvent]) -> Result<Self, ProjectionError> {
        let (first, rest) = events.split_first().ok_or(ProjectionError::EmptyLog)?;
        let mut projection = Self::genesis(first)?;
        for event in rest {
            projection.apply(event)?;
        }
        Ok(projection)
    }

    /// Start a projection from the `mission_submitted` event.
    pub fn genesis(event: &MissionEvent) -> Result<Self, ProjectionError> {
        let MissionEventKind::MissionSubmitted {
            objective,
            mode,
            budget_limit,
            seed,
            user_context,
        } = &event.kind
        else {
            return Err(ProjectionError::NotSubmitted(event.event_type()));
        };
        if event.sequence != 1 {
            return Err(ProjectionError::OutOfOrder {
                expected: 1,
                found: event.sequence,
            });
        }

        Ok(Self {
            mission: Mission {
                id: event.mission_id,
                objective: objective.clone(),
                mode: *mode,
                status: MissionStatus::Draft,
                steps: Vec::new(),
                step_history: Vec::new(),
                assigned_agents: BTreeSet::new(),
                budget_limit: *budget_limit,
                budget_spent: 0.0,
                seed: *seed,
                user_context: user_context.clone(),
                version: event.sequence,
                pending_checkpoint: None,
                reason: None,
                created_at: event.occurred_at,
                updated_at: event.occurred_at,
            },
            checkpoints: Vec::new(),
            artifacts: Vec::new(),
        })
    }

    pub fn version(&self) -> u64 {
        self.mission.version
    }

    pub fn status(&self) -> MissionStatus {
        self.mission.status
    }

    pub fn checkpoint(&self, id: CheckpointId) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|checkpoint| checkpoint.id == id)
    }

    pub fn pending_checkpoint(&self) -> Option<&Checkpoint> {
        self.mission
            .pending_checkpoint
            .and_then(|id| self.checkpoint(id))
    }

    pub fn last_checkpoint(&self) -> Option<CheckpointId> {
        self.checkpoints.last().map(|checkpoint| checkpoint.id)
    }

    /// Fold one event into the projection.
    pub fn apply(&mut self, event: &MissionEvent) -> Result<(), ProjectionError> {
        if event.mission_id != self.mission.id {
            return Err(ProjectionError::MissionMismatch {
                expected: self.mission.id,
                found: event.mission_id,
            });
        }
        let expected = self.mission.version + 1;
        if event.sequence != expected {
            return Err(ProjectionError::OutOfOrder {
                expected,
                found: event.sequence,
            });
        }

        let at = event.occurred_at;
        match &event.kind {
            MissionEventKind::MissionSubmitted { .. } => {
                return Err(ProjectionError::AlreadySubmitted(self.mission.id));
            }
            MissionEventKind::BriefingStarted => self.transition(MissionStatus::Briefing)?,
            MissionEventKind::PlanGenerated {
                steps,
                unassigned,
                cost,
            } => {
                if self.mission.status != MissionStatus::Briefing {
                    return Err(ProjectionError::InvalidTransition {
                        from: self.mission.status,
                        to: MissionStatus::Briefing,
                    });
                }
                self.mission.steps = steps.clone();
                for step in &mut self.mission.steps {
                    if unassigned.contains(&step.id) {
                        step.status = StepStatus::Failed;
                        step.error = Some(UNASSIGNED_ERROR.to_string());
                    }
                    self.mission.assigned_agents.extend(step.agents.iter().cloned());
                }
                self.charge(*cost);
            }
            MissionEventKind::MissionReady => self.transition(MissionStatus::Ready)?,
            MissionEventKind::MissionStarted => self.transition(MissionStatus::Running)?,
            MissionEventKind::StepAssigned { step_id, agents } => {
                let step = self.step_mut(*step_id)?;
                step.agents = agents.clone();
                self.mission.assigned_agents.extend(agents.iter().cloned());
            }
            MissionEventKind::StepStarted { step_id, attempt } => {
                let step = self.step_mut(*step_id)?;
                if !matches!(step.status, StepStatus::Pending | StepStatus::InProgress) {
                    return Err(ProjectionError::InvalidStepState {
                        step_id: *step_id,
                        status: step.status,
                        event: "step_started",
                    });
                }
                step.status = StepStatus::InProgress;
                step.attempts = *attempt;
                step.started_at = Some(at);
            }
            MissionEventKind::StepCompleted {
                step_id,
                result,
                cost,
            } => {
                let step = self.step_mut(*step_id)?;
                if step.status != StepStatus::InProgress {
                    return Err(ProjectionError::InvalidStepState {
                        step_id: *step_id,
                        status: step.status,
                        event: "step_completed",
                    });
                }
                step.status = StepStatus::Completed;
                step.result = Some(result.clone());
                step.error = None;
                step.completed_at = Some(at);
                self.charge(*cost);
            }
            MissionEventKind::StepFailed {
                step_id,
                error,
                cost,
            } => {
                let step = self.step_mut(*step_id)?;
                step.status = StepStatus::Failed;
                step.error = Some(error.clone());
                self.charge(*cost);
            }
            MissionEventKind::StepRequeued {
                step_id,
                reset_attempts,
                cost,
                ..
            } => {
                let step = self.step_mut(*step_id)?;
                if step.status == StepStatus::Completed {
                    return Err(ProjectionError::InvalidStepState {
                        step_id: *step_id,
                        status: step.status,
                        event: "step_requeued",
                    });
                }
                step.status = StepStatus::Pending;
                if *reset_attempts {
                    step.attempts = 0;
                }
                self.charge(*cost);
            }
            MissionEventKind::StepApproved { step_id } => {
                self.step_mut(*step_id)?.approved = true;
            }
            MissionEventKind::StepRevised { supersedes, step } => {
                let idx = self
                    .mission
                    .steps
                    .iter()
                    .position(|existing| existing.id == *supersedes)
                    .ok_or(ProjectionError::UnknownStep(*supersedes))?;
                let previous = std::mem::replace(&mut self.mission.steps[idx], step.clone());
                self.mission.step_history.push(previous);
                self.mission.assigned_agents.extend(step.agents.iter().cloned());
            }
            MissionEventKind::StepSkipped { step_id, .. } => {
                let step = self.step_mut(*step_id)?;
                step.status = StepStatus::Completed;
                step.result = Some(StepResult::skipped());
                step.completed_at = Some(at);
            }
            MissionEventKind::CheckpointRaised { checkpoint } => {
                if let Some(pending) = self.mission.pending_checkpoint {
                    return Err(ProjectionError::CheckpointAlreadyPending(pending));
                }
                self.transition(MissionStatus::Checkpoint)?;
                self.mission.pending_checkpoint = Some(checkpoint.id);
                self.checkpoints.push(checkpoint.clone());
            }
            MissionEventKind::CheckpointResolved {
                checkpoint_id,
                status,
                response,
            } => {
                let checkpoint = self
                    .checkpoints
                    .iter_mut()
                    .find(|checkpoint| checkpoint.id == *checkpoint_id)
                    .ok_or(ProjectionError::UnknownCheckpoint(*checkpoint_id))?;
                if checkpoint.status.is_resolved() {
                    return Err(ProjectionError::CheckpointAlreadyResolved(*checkpoint_id));
                }
                checkpoint.status = *status;
                checkpoint.response = Some(response.clone());
                checkpoint.resolved_at = Some(at);
                let resume_to = checkpoint.resume_to;

                self.mission.pending_checkpoint = None;
                if matches!(status, CheckpointStatus::Approved | CheckpointStatus::Modified) {
                    self.transition(resume_to)?;
                }
            }
            MissionEventKind::ArtifactProduced { artifact } => {
                self.artifacts.push(artifact.clone());
            }
            MissionEventKind::MissionPaused => self.transition(MissionStatus::Paused)?,
            MissionEventKind::MissionResumed => self.transition(MissionStatus::Running)?,
            MissionEventKind::MissionCompleted { .. } => {
                if !self.mission.all_steps_completed() {
                    return Err(ProjectionError::IncompletePlan);
                }
                self.transition(MissionStatus::Completed)?;
            }
            MissionEventKind::MissionFailed { reason, .. } => {
                self.transition(MissionStatus::Failed)?;
                self.mission.reason = Some(reason.clone());
            }
            MissionEventKind::MissionAborted { reason, .. } => {
                self.transition(MissionStatus::Aborted)?;
                self.mission.reason = Some(reason.clone());
            }
        }

        self.mission.version = event.sequence;
        self.mission.updated_at = at;
        Ok(())
    }

    fn transition(&mut self, next: MissionStatus) -> Result<(), ProjectionError> {
        let current = self.mission.status;
        if !current.can_transition_to(next) {
            return Err(ProjectionError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        self.mission.status = next;
        Ok(())
    }

    fn step_mut(&mut self, id: StepId) -> Result<&mut crate::domain::plan::PlanStep, ProjectionError> {
        self.mission
            .step_mut(id)
            .ok_or(ProjectionError::UnknownStep(id))
    }

    /// Spending only ever grows; bogus provider costs count as zero.
    fn charge(&mut self, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            self.mission.budget_spent += cost;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::checkpoint::{CheckpointResponse, CheckpointType};
    use crate::domain::mission::MissionMode;
    use crate::domain::plan::PlanStepDraft;
    use chrono::Utc;

    struct Log {
        mission_id: MissionId,
        events: Vec<MissionEvent>,
    }

    impl Log {
        fn new() -> Self {
            let mut log = Self {
                mission_id: MissionId::new(),
                events: Vec::new(),
            };
            log.push(MissionEventKind::MissionSubmitted {
                objective: "Compare two vendors".into(),
                mode: MissionMode::AutonomousManual,
                budget_limit: 5.0,
                seed: 7,
                user_context: serde_json::Value::Null,
            });
            log
        }

        fn push(&mut self, kind: MissionEventKind) -> &MissionEvent {
            let sequence = self.events.len() as u64 + 1;
            self.events.push(MissionEvent::new(self.mission_id, sequence, kind));
            self.events.last().unwrap()
        }
    }

    fn checkpoint(mission_id: MissionId, resume_to: MissionStatus) -> Checkpoint {
        Checkpoint {
            id: CheckpointId::new(),
            mission_id,
            checkpoint_type: CheckpointType::PlanApproval,
            prompt: "Approve the plan?".into(),
            options: vec![],
            context: serde_json::Value::Null,
            step_id: None,
            gate: None,
            resume_to,
            status: CheckpointStatus::Pending,
            response: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn test_replay_tracks_plan_and_budget() {
        let mut log = Log::new();
        let step = PlanStepDraft::new("Collect pricing").into_step(log.mission_id, 0, "direct", 2);
        let step_id = step.id;
        log.push(MissionEventKind::BriefingStarted);
        log.push(MissionEventKind::PlanGenerated {
            steps: vec![step],
            unassigned: vec![],
            cost: 0.25,
        });
        log.push(MissionEventKind::MissionReady);
        log.push(MissionEventKind::MissionStarted);
        log.push(MissionEventKind::StepStarted { step_id, attempt: 1 });
        log.push(MissionEventKind::StepCompleted {
            step_id,
            result: StepResult {
                output: "done".into(),
                confidence: 1.0,
                branches: vec![],
                trace: vec![],
                skipped: false,
            },
            cost: -3.0,
        });

        let projection = MissionProjection::replay(&log.events).unwrap();
        assert_eq!(projection.status(), MissionStatus::Running);
        assert_eq!(projection.version(), 7);
        assert!((projection.mission.budget_spent - 0.25).abs() < f64::EPSILON);
        assert!(projection.mission.all_steps_completed());
    }

    #[test]
    fn test_second_pending_checkpoint_is_rejected() {
        let mut log = Log::new();
        log.push(MissionEventKind::BriefingStarted);
        let first = checkpoint(log.mission_id, MissionStatus::Ready);
        log.push(MissionEventKind::CheckpointRaised { checkpoint: first.clone() });
        let mut projection = MissionProjection::replay(&log.events).unwrap();
        assert_eq!(projection.pending_checkpoint().map(|c| c.id), Some(first.id));

        let second = MissionEvent::new(
            log.mission_id,
            4,
            MissionEventKind::CheckpointRaised {
                checkpoint: checkpoint(log.mission_id, MissionStatus::Ready),
            },
        );
        assert_eq!(
            projection.apply(&second),
            Err(ProjectionError::CheckpointAlreadyPending(first.id))
        );
    }

    #[test]
    fn test_approval_resumes_recorded_status() {
        let mut log = Log::new();
        log.push(MissionEventKind::BriefingStarted);
        let raised = checkpoint(log.mission_id, MissionStatus::Ready);
        log.push(MissionEventKind::CheckpointRaised { checkpoint: raised.clone() });
        log.push(MissionEventKind::CheckpointResolved {
            checkpoint_id: raised.id,
            status: CheckpointStatus::Approved,
            response: CheckpointResponse::approve(),
        });

        let projection = MissionProjection::replay(&log.events).unwrap();
        assert_eq!(projection.status(), MissionStatus::Ready);
        assert!(projection.mission.pending_checkpoint.is_none());
        assert!(projection.checkpoints[0].resolved_at.is_some());
    }

    #[test]
    fn test_rejects_gaps_and_foreign_events() {
        let log = Log::new();
        let mut projection = MissionProjection::replay(&log.events).unwrap();

        let gap = MissionEvent::new(log.mission_id, 5, MissionEventKind::BriefingStarted);
        assert!(matches!(
            projection.apply(&gap),
            Err(ProjectionError::OutOfOrder { expected: 2, found: 5 })
        ));

        let foreign = MissionEvent::new(MissionId::new(), 2, MissionEventKind::BriefingStarted);
        assert!(matches!(
            projection.apply(&foreign),
            Err(ProjectionError::MissionMismatch { .. })
        ));
    }

    #[test]
    fn test_cannot_skip_lifecycle_states() {
        let log = Log::new();
        let mut projection = MissionProjection::replay(&log.events).unwrap();
        let event = MissionEvent::new(log.mission_id, 2, MissionEventKind::MissionStarted);
        assert_eq!(
            projection.apply(&event),
            Err(ProjectionError::InvalidTransition {
                from: MissionStatus::Draft,
                to: MissionStatus::Running
            })
        );
    }
}
