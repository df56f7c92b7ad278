// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Checkpoint Gate
//!
//! Raises and resolves the human decisions a mission waits on. Resolution is
//! the only way out of `checkpoint`: `advance` is a no-op while one is
//! pending, so a retried or duplicated call can never slip past a gate.
//!
//! Both operations expect the caller to hold the mission lock and work on a
//! freshly loaded projection; the resulting events are committed through the
//! [`MissionLedger`] in a single batch together with their follow-ups:
//!
//! | Response | Follow-up events |
//! |----------|------------------|
//! | reject | `mission_aborted` |
//! | approve, `before` step gate | `step_approved` |
//! | approve + `retry` | `step_requeued` with attempts reset |
//! | approve + `skip` | `step_skipped` |
//! | approve + `abort` | `mission_aborted` |
//! | modify, step checkpoint | `step_revised` built from the patch |
//! | modify, plan checkpoint | one `step_revised` per `{"position": n}` entry |

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::application::ledger::MissionLedger;
use crate::domain::checkpoint::{
    Checkpoint, CheckpointAction, CheckpointId, CheckpointResponse, CheckpointStatus,
    CheckpointType, RISK_OPTION_ABORT, RISK_OPTION_RETRY, RISK_OPTION_SKIP,
};
use crate::domain::error::MissionError;
use crate::domain::events::MissionEventKind;
use crate::domain::mission::MissionStatus;
use crate::domain::plan::{GateTiming, PlanStep, StepId, StepPatch, StepStatus};
use crate::domain::projection::MissionProjection;

/// Parameters of a checkpoint to raise.
#[derive(Debug, Clone, PartialEq)]
pub struct RaiseCheckpoint {
    pub checkpoint_type: CheckpointType,
    pub prompt: String,
    pub options: Vec<String>,
    pub context: serde_json::Value,
    pub step_id: Option<StepId>,
    pub gate: Option<GateTiming>,
    /// Status to return to on approval; derived from the current status when unset
    pub resume_to: Option<MissionStatus>,
}

impl RaiseCheckpoint {
    pub fn new(checkpoint_type: CheckpointType, prompt: impl Into<String>) -> Self {
        Self {
            checkpoint_type,
            prompt: prompt.into(),
            options: Vec::new(),
            context: serde_json::Value::Null,
            step_id: None,
            gate: None,
            resume_to: None,
        }
    }

    /// `retry | skip | abort` decision for a failed step.
    pub fn risk_decision(step: &PlanStep, reason: &str) -> Self {
        Self {
            options: vec![
                RISK_OPTION_RETRY.to_string(),
                RISK_OPTION_SKIP.to_string(),
                RISK_OPTION_ABORT.to_string(),
            ],
            context: serde_json::json!({
                "step": step.description,
                "position": step.position,
                "attempts": step.attempts,
                "error": reason,
            }),
            step_id: Some(step.id),
            ..Self::new(
                CheckpointType::RiskDecision,
                format!("Step {} failed: {}. Retry, skip or abort?", step.position + 1, reason),
            )
        }
    }

    pub fn step_gate(step: &PlanStep, checkpoint_type: CheckpointType, timing: GateTiming) -> Self {
        let prompt = match timing {
            GateTiming::Before => format!("Approve step {} before it runs: {}", step.position + 1, step.description),
            GateTiming::After => format!("Review the result of step {}: {}", step.position + 1, step.description),
        };
        Self {
            context: serde_json::json!({
                "step": step.description,
                "position": step.position,
                "strategy": step.policy.strategy,
                "agents": step.agents,
                "output": step.result.as_ref().map(|result| result.output.clone()),
            }),
            step_id: Some(step.id),
            gate: Some(timing),
            resume_to: Some(MissionStatus::Running),
            ..Self::new(checkpoint_type, prompt)
        }
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn for_step(mut self, step_id: StepId) -> Self {
        self.step_id = Some(step_id);
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanPatch {
    steps: Vec<PositionedPatch>,
}

#[derive(Debug, Deserialize)]
struct PositionedPatch {
    position: usize,
    #[serde(flatten)]
    patch: serde_json::Map<String, serde_json::Value>,
}

pub struct CheckpointGate {
    ledger: Arc<MissionLedger>,
}

impl CheckpointGate {
    pub fn new(ledger: Arc<MissionLedger>) -> Self {
        Self { ledger }
    }

    pub async fn raise(
        &self,
        projection: &mut MissionProjection,
        request: RaiseCheckpoint,
    ) -> Result<CheckpointId, MissionError> {
        let mission = &projection.mission;
        if let Some(pending) = mission.pending_checkpoint {
            return Err(MissionError::CheckpointAlreadyPending {
                mission_id: mission.id,
                checkpoint_id: pending,
            });
        }
        if let Some(step_id) = request.step_id {
            if mission.step(step_id).is_none() {
                return Err(MissionError::InvalidCheckpointResponse(format!(
                    "step {step_id} is not part of the active plan"
                )));
            }
        }

        let resume_to = request.resume_to.unwrap_or(match mission.status {
            MissionStatus::Briefing | MissionStatus::Ready => MissionStatus::Ready,
            _ => MissionStatus::Running,
        });
        if !mission.status.can_transition_to(MissionStatus::Checkpoint) {
            return Err(MissionError::InvalidTransition {
                mission_id: mission.id,
                status: mission.status,
                action: "raise a checkpoint",
            });
        }

        let checkpoint = Checkpoint {
            id: CheckpointId::new(),
            mission_id: mission.id,
            checkpoint_type: request.checkpoint_type,
            prompt: request.prompt,
            options: request.options,
            context: request.context,
            step_id: request.step_id,
            gate: request.gate,
            resume_to,
            status: CheckpointStatus::Pending,
            response: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        let checkpoint_id = checkpoint.id;
        let checkpoint_type = checkpoint.checkpoint_type;

        self.ledger
            .commit(projection, vec![MissionEventKind::CheckpointRaised { checkpoint }])
            .await?;

        info!(
            mission_id = %projection.mission.id,
            checkpoint_id = %checkpoint_id,
            checkpoint_type = %checkpoint_type,
            "Checkpoint raised"
        );
        Ok(checkpoint_id)
    }

    /// Resolve a pending checkpoint and apply its follow-ups.
    pub async fn resolve(
        &self,
        projection: &mut MissionProjection,
        checkpoint_id: CheckpointId,
        response: CheckpointResponse,
    ) -> Result<MissionStatus, MissionError> {
        let checkpoint = projection
            .checkpoint(checkpoint_id)
            .ok_or(MissionError::CheckpointNotFound(checkpoint_id))?;
        if !checkpoint.is_pending() {
            return Err(MissionError::CheckpointAlreadyResolved(checkpoint_id));
        }
        validate_response(checkpoint, &response)?;

        let mut events = vec![MissionEventKind::CheckpointResolved {
            checkpoint_id,
            status: response.action.resulting_status(),
            response: response.clone(),
        }];
        events.extend(follow_ups(projection, checkpoint, &response)?);

        self.ledger.commit(projection, events).await?;

        info!(
            mission_id = %projection.mission.id,
            checkpoint_id = %checkpoint_id,
            action = ?response.action,
            option = response.option.as_deref().unwrap_or("-"),
            status = %projection.status(),
            "Checkpoint resolved"
        );
        Ok(projection.status())
    }
}

/// Shape check of a response against the checkpoint it answers.
pub fn validate_response(
    checkpoint: &Checkpoint,
    response: &CheckpointResponse,
) -> Result<(), MissionError> {
    if let Some(option) = &response.option {
        if !checkpoint.options.iter().any(|known| known == option) {
            return Err(MissionError::InvalidCheckpointResponse(format!(
                "option '{}' is not one of [{}]",
                option,
                checkpoint.options.join(", ")
            )));
        }
    }
    if response.action == CheckpointAction::Modify
        && !matches!(response.patch, Some(serde_json::Value::Object(_)))
    {
        return Err(MissionError::InvalidCheckpointResponse(
            "modify requires a JSON object patch".to_string(),
        ));
    }
    if response.action == CheckpointAction::Modify && checkpoint.step_id.is_none()
        && checkpoint.checkpoint_type != CheckpointType::PlanApproval
    {
        return Err(MissionError::InvalidCheckpointResponse(
            "modify needs a step or plan checkpoint".to_string(),
        ));
    }
    Ok(())
}

fn follow_ups(
    projection: &MissionProjection,
    checkpoint: &Checkpoint,
    response: &CheckpointResponse,
) -> Result<Vec<MissionEventKind>, MissionError> {
    let mission = &projection.mission;
    let aborted = |reason: String| MissionEventKind::MissionAborted {
        reason,
        last_completed_step: mission.last_completed_step(),
    };

    let step = checkpoint.step_id.and_then(|id| mission.step(id));
    let events = match response.action {
        CheckpointAction::Reject => vec![aborted(format!(
            "{} checkpoint {} rejected{}",
            checkpoint.checkpoint_type,
            checkpoint.id,
            response
                .note
                .as_deref()
                .map(|note| format!(": {note}"))
                .unwrap_or_default()
        ))],
        CheckpointAction::Approve => match (response.option.as_deref(), step) {
            (Some(RISK_OPTION_ABORT), _) => vec![aborted(format!(
                "aborted at risk decision {}",
                checkpoint.id
            ))],
            (Some(RISK_OPTION_SKIP), Some(step)) if step.status != StepStatus::Completed => {
                vec![MissionEventKind::StepSkipped {
                    step_id: step.id,
                    reason: "skipped at risk decision".to_string(),
                }]
            }
            (Some(RISK_OPTION_RETRY), Some(step)) | (None, Some(step))
                if checkpoint.checkpoint_type == CheckpointType::RiskDecision
                    && step.status != StepStatus::Completed =>
            {
                vec![MissionEventKind::StepRequeued {
                    step_id: step.id,
                    reason: "retry at risk decision".to_string(),
                    reset_attempts: true,
                    cost: 0.0,
                }]
            }
            (_, Some(step)) if checkpoint.gate == Some(GateTiming::Before) && !step.approved => {
                vec![MissionEventKind::StepApproved { step_id: step.id }]
            }
            _ => Vec::new(),
        },
        CheckpointAction::Modify => {
            let patch = response.patch.clone().unwrap_or_default();
            match step {
                Some(step) => vec![revise(step, patch, true)?],
                None => revise_plan(mission.steps.as_slice(), patch)?,
            }
        }
    };
    Ok(events)
}

fn revise(
    step: &PlanStep,
    patch: serde_json::Value,
    approve: bool,
) -> Result<MissionEventKind, MissionError> {
    let patch: StepPatch = serde_json::from_value(patch).map_err(|e| {
        MissionError::InvalidCheckpointResponse(format!("invalid step patch: {e}"))
    })?;
    let mut revised = step.revise(&patch);
    revised.approved = approve || step.approved;
    Ok(MissionEventKind::StepRevised {
        supersedes: step.id,
        step: revised,
    })
}

fn revise_plan(
    steps: &[PlanStep],
    patch: serde_json::Value,
) -> Result<Vec<MissionEventKind>, MissionError> {
    let plan: PlanPatch = serde_json::from_value(patch).map_err(|e| {
        MissionError::InvalidCheckpointResponse(format!(
            "plan patch must be {{\"steps\": [{{\"position\": n, ...}}]}}: {e}"
        ))
    })?;

    let mut events = Vec::with_capacity(plan.steps.len());
    for entry in plan.steps {
        let step = steps
            .iter()
            .find(|step| step.position == entry.position)
            .ok_or_else(|| {
                MissionError::InvalidCheckpointResponse(format!(
                    "no step at position {}",
                    entry.position
                ))
            })?;
        events.push(revise(step, serde_json::Value::Object(entry.patch), false)?);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mission::{MissionId, MissionMode};
    use crate::domain::plan::PlanStepDraft;
    use crate::domain::repository::MissionEventStore;
    use crate::infrastructure::event_bus::MissionEventBus;
    use crate::infrastructure::repositories::{InMemoryMissionEventStore, InMemoryMissionRepository};
    use serde_json::json;

    async fn running_mission() -> (CheckpointGate, Arc<MissionLedger>, MissionProjection) {
        let store: Arc<dyn MissionEventStore> = Arc::new(InMemoryMissionEventStore::new());
        let bus = Arc::new(MissionEventBus::new(16, store.clone()));
        let ledger = Arc::new(MissionLedger::new(
            store,
            Arc::new(InMemoryMissionRepository::new()),
            bus,
        ));

        let id = MissionId::new();
        let mut projection = ledger
            .create(
                id,
                MissionEventKind::MissionSubmitted {
                    objective: "Audit the vendor".into(),
                    mode: MissionMode::AutonomousManual,
                    budget_limit: 5.0,
                    seed: 3,
                    user_context: serde_json::Value::Null,
                },
            )
            .await
            .unwrap();
        let mut step = PlanStepDraft::new("Read the contract").into_step(id, 0, "direct", 2);
        step.parameters = json!({"section": "all"});
        ledger
            .commit(
                &mut projection,
                vec![
                    MissionEventKind::BriefingStarted,
                    MissionEventKind::PlanGenerated {
                        steps: vec![step],
                        unassigned: vec![],
                        cost: 0.0,
                    },
                    MissionEventKind::MissionReady,
                    MissionEventKind::MissionStarted,
                ],
            )
            .await
            .unwrap();
        (CheckpointGate::new(ledger.clone()), ledger, projection)
    }

    #[tokio::test]
    async fn test_second_raise_is_rejected() {
        let (gate, _, mut projection) = running_mission().await;
        let step = projection.mission.steps[0].clone();

        let first = gate
            .raise(
                &mut projection,
                RaiseCheckpoint::step_gate(&step, CheckpointType::ToolUseApproval, GateTiming::Before),
            )
            .await
            .unwrap();
        let err = gate
            .raise(&mut projection, RaiseCheckpoint::risk_decision(&step, "boom"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MissionError::CheckpointAlreadyPending { checkpoint_id, .. } if checkpoint_id == first
        ));
        assert_eq!(projection.checkpoints.len(), 1);
    }

    #[tokio::test]
    async fn test_approving_before_gate_marks_step_approved() {
        let (gate, _, mut projection) = running_mission().await;
        let step = projection.mission.steps[0].clone();
        let id = gate
            .raise(
                &mut projection,
                RaiseCheckpoint::step_gate(&step, CheckpointType::ToolUseApproval, GateTiming::Before),
            )
            .await
            .unwrap();

        let status = gate
            .resolve(&mut projection, id, CheckpointResponse::approve())
            .await
            .unwrap();

        assert_eq!(status, MissionStatus::Running);
        assert!(projection.mission.steps[0].approved);

        let again = gate
            .resolve(&mut projection, id, CheckpointResponse::approve())
            .await
            .unwrap_err();
        assert!(matches!(again, MissionError::CheckpointAlreadyResolved(found) if found == id));
    }

    #[tokio::test]
    async fn test_reject_aborts_mission() {
        let (gate, _, mut projection) = running_mission().await;
        let step = projection.mission.steps[0].clone();
        let id = gate
            .raise(
                &mut projection,
                RaiseCheckpoint::step_gate(&step, CheckpointType::PlanApproval, GateTiming::Before),
            )
            .await
            .unwrap();

        let status = gate
            .resolve(&mut projection, id, CheckpointResponse::reject())
            .await
            .unwrap();

        assert_eq!(status, MissionStatus::Aborted);
        assert_eq!(projection.checkpoints[0].status, CheckpointStatus::Rejected);
    }

    #[tokio::test]
    async fn test_modify_appends_new_revision() {
        let (gate, _, mut projection) = running_mission().await;
        let original = projection.mission.steps[0].clone();
        let id = gate
            .raise(
                &mut projection,
                RaiseCheckpoint::step_gate(&original, CheckpointType::ToolUseApproval, GateTiming::Before),
            )
            .await
            .unwrap();

        gate.resolve(
            &mut projection,
            id,
            CheckpointResponse::modify(json!({"parameters": {"section": "termination"}})),
        )
        .await
        .unwrap();

        let revised = &projection.mission.steps[0];
        assert_eq!(revised.revision, 1);
        assert_eq!(revised.supersedes, Some(original.id));
        assert_eq!(revised.parameters, json!({"section": "termination"}));
        assert!(revised.approved);
        assert_eq!(projection.mission.step_history, vec![original]);
    }

    #[tokio::test]
    async fn test_invalid_responses_are_rejected() {
        let (gate, _, mut projection) = running_mission().await;
        let step = projection.mission.steps[0].clone();
        let id = gate
            .raise(&mut projection, RaiseCheckpoint::risk_decision(&step, "boom"))
            .await
            .unwrap();

        let bad_option = gate
            .resolve(&mut projection, id, CheckpointResponse::choose("postpone"))
            .await
            .unwrap_err();
        assert!(matches!(bad_option, MissionError::InvalidCheckpointResponse(_)));

        let bad_patch = gate
            .resolve(&mut projection, id, CheckpointResponse::modify(json!("rewrite")))
            .await
            .unwrap_err();
        assert!(matches!(bad_patch, MissionError::InvalidCheckpointResponse(_)));

        let unknown_field = gate
            .resolve(&mut projection, id, CheckpointResponse::modify(json!({"position": 3})))
            .await
            .unwrap_err();
        assert!(matches!(unknown_field, MissionError::InvalidCheckpointResponse(_)));

        // Nothing was appended for the rejected attempts
        assert!(projection.pending_checkpoint().is_some());
        let missing = gate
            .resolve(&mut projection, CheckpointId::new(), CheckpointResponse::approve())
            .await
            .unwrap_err();
        assert!(matches!(missing, MissionError::CheckpointNotFound(_)));
    }

    #[tokio::test]
    async fn test_skip_completes_failed_step() {
        let (gate, ledger, mut projection) = running_mission().await;
        let step_id = projection.mission.steps[0].id;
        ledger
            .commit(
                &mut projection,
                vec![
                    MissionEventKind::StepStarted { step_id, attempt: 1 },
                    MissionEventKind::StepFailed {
                        step_id,
                        error: "provider down".into(),
                        cost: 0.0,
                    },
                ],
            )
            .await
            .unwrap();
        let step = projection.mission.steps[0].clone();
        let id = gate
            .raise(&mut projection, RaiseCheckpoint::risk_decision(&step, "provider down"))
            .await
            .unwrap();

        gate.resolve(&mut projection, id, CheckpointResponse::choose(RISK_OPTION_SKIP))
            .await
            .unwrap();

        let step = &projection.mission.steps[0];
        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.result.as_ref().unwrap().skipped);
        assert!(projection.mission.all_steps_completed());
    }
}
