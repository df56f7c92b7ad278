// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Mission Engine
//!
//! The mission state machine. Every operation takes the per-mission lock,
//! loads the current projection through the [`MissionLedger`], decides which
//! events to append, and commits them; the projection fold enforces the
//! transition table, so a decision the engine gets wrong is rejected before
//! it reaches the log.
//!
//! `advance` performs exactly one unit of work:
//!
//! | Status | Work |
//! |--------|------|
//! | `draft` / `briefing` | generate the plan, assemble the team, gate on plan approval |
//! | `ready` | start the mission and run the first step |
//! | `running` | run one step, raise a gate or risk decision, or synthesize and complete |
//! | `paused` / `checkpoint` / terminal | nothing; the current status is returned |
//!
//! The cursor is the first step that is not completed. It lives in the event
//! log rather than in memory, so a restarted process resumes at the same
//! position; a step left `in_progress` by a crash is simply executed again.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::checkpoint_gate::{CheckpointGate, RaiseCheckpoint};
use crate::application::ledger::MissionLedger;
use crate::application::planner::{PlanConstraints, PlanGenerator};
use crate::application::step_executor::{StepExecutionError, StepExecutor};
use crate::application::strategies::StrategyRegistry;
use crate::application::team::TeamAssembler;
use crate::domain::agent::AgentProfile;
use crate::domain::artifact::{ArtifactType, MissionArtifact};
use crate::domain::checkpoint::{Checkpoint, CheckpointId, CheckpointResponse, CheckpointStatus, CheckpointType};
use crate::domain::engine_config::{EngineConfig, EngineSettings};
use crate::domain::error::MissionError;
use crate::domain::events::{MissionEvent, MissionEventKind};
use crate::domain::mission::{Mission, MissionId, MissionMode, MissionStatus};
use crate::domain::plan::{GateTiming, PlanStep, StepStatus};
use crate::domain::projection::{MissionProjection, UNASSIGNED_ERROR};
use crate::domain::repository::{MissionEventStore, MissionRepository, MissionSummary};
use crate::infrastructure::event_bus::{MissionEventBus, MissionEventStream};
use crate::infrastructure::llm::ProviderRegistry;

/// Input to [`MissionEngine::submit`].
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub objective: String,
    pub mode: MissionMode,
    /// Falls back to `engine.default_budget` when unset
    pub budget_limit: Option<f64>,
    pub user_context: serde_json::Value,
}

impl SubmitRequest {
    pub fn new(objective: impl Into<String>, mode: MissionMode) -> Self {
        Self {
            objective: objective.into(),
            mode,
            budget_limit: None,
            user_context: serde_json::Value::Null,
        }
    }

    pub fn with_budget(mut self, budget_limit: f64) -> Self {
        self.budget_limit = Some(budget_limit);
        self
    }

    pub fn with_user_context(mut self, user_context: serde_json::Value) -> Self {
        self.user_context = user_context;
        self
    }
}

pub struct MissionEngine {
    settings: EngineSettings,
    agents: Vec<AgentProfile>,
    ledger: Arc<MissionLedger>,
    gate: CheckpointGate,
    planner: PlanGenerator,
    team: TeamAssembler,
    executor: StepExecutor,
    strategies: Arc<StrategyRegistry>,
}

impl MissionEngine {
    pub fn new(
        config: &EngineConfig,
        providers: Arc<ProviderRegistry>,
        store: Arc<dyn MissionEventStore>,
        cache: Arc<dyn MissionRepository>,
    ) -> Self {
        let settings = config.engine.clone();
        let strategies = Arc::new(StrategyRegistry::with_defaults(&config.strategies));
        let bus = Arc::new(MissionEventBus::new(settings.event_buffer, store.clone()));
        let ledger = Arc::new(MissionLedger::new(store, cache, bus));

        Self {
            gate: CheckpointGate::new(ledger.clone()),
            planner: PlanGenerator::new(
                providers.clone(),
                strategies.clone(),
                settings.planner_provider.clone(),
                settings.planning_strategy.clone(),
            ),
            team: TeamAssembler::new(),
            executor: StepExecutor::new(
                providers,
                strategies.clone(),
                settings.default_strategy.clone(),
                settings.branch_timeout,
            ),
            agents: config.agents.clone(),
            strategies,
            ledger,
            settings,
        }
    }

    pub fn bus(&self) -> &Arc<MissionEventBus> {
        self.ledger.bus()
    }

    pub fn agents(&self) -> &[AgentProfile] {
        &self.agents
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a mission in `draft`.
    pub async fn submit(&self, request: SubmitRequest) -> Result<MissionId, MissionError> {
        let objective = request.objective.trim();
        if objective.is_empty() {
            return Err(MissionError::InvalidObjective("objective is empty".to_string()));
        }
        let length = objective.chars().count();
        if length > self.settings.max_objective_chars {
            return Err(MissionError::InvalidObjective(format!(
                "objective is {} characters, limit is {}",
                length, self.settings.max_objective_chars
            )));
        }

        let budget_limit = request.budget_limit.unwrap_or(self.settings.default_budget);
        if !budget_limit.is_finite() || budget_limit <= 0.0 {
            return Err(MissionError::InvalidBudget(format!(
                "budget limit must be a positive amount, got {budget_limit}"
            )));
        }

        let seed = self.settings.seed.unwrap_or_else(rand::random);
        let mission_id = MissionId::new();
        self.ledger
            .create(
                mission_id,
                MissionEventKind::MissionSubmitted {
                    objective: objective.to_string(),
                    mode: request.mode,
                    budget_limit,
                    seed,
                    user_context: request.user_context,
                },
            )
            .await?;

        info!(
            mission_id = %mission_id,
            mode = %request.mode,
            budget_limit,
            seed,
            "Mission submitted"
        );
        Ok(mission_id)
    }

    pub async fn advance(&self, mission_id: MissionId) -> Result<MissionStatus, MissionError> {
        self.advance_with_cancel(mission_id, &CancellationToken::new()).await
    }

    /// One unit of work. Cancelling `cancel` requeues the in-flight step and
    /// returns [`MissionError::Cancelled`].
    pub async fn advance_with_cancel(
        &self,
        mission_id: MissionId,
        cancel: &CancellationToken,
    ) -> Result<MissionStatus, MissionError> {
        let _guard = self.ledger.lock(mission_id).await;
        let mut projection = self.ledger.load(mission_id).await?;

        match projection.status() {
            status if status.is_terminal() || status.is_suspended() => {
                debug!(mission_id = %mission_id, status = %status, "Nothing to advance");
                Ok(status)
            }
            MissionStatus::Draft => {
                self.ledger
                    .commit(&mut projection, vec![MissionEventKind::BriefingStarted])
                    .await?;
                info!(mission_id = %mission_id, "Briefing started");
                self.brief(&mut projection).await
            }
            MissionStatus::Briefing => self.brief(&mut projection).await,
            MissionStatus::Ready => {
                self.ledger
                    .commit(&mut projection, vec![MissionEventKind::MissionStarted])
                    .await?;
                info!(mission_id = %mission_id, "Mission started");
                self.run_step(&mut projection, cancel).await
            }
            _ => self.run_step(&mut projection, cancel).await,
        }
    }

    /// Advance until the mission suspends or terminates.
    pub async fn drive(&self, mission_id: MissionId) -> Result<MissionStatus, MissionError> {
        self.drive_with_cancel(mission_id, &CancellationToken::new()).await
    }

    pub async fn drive_with_cancel(
        &self,
        mission_id: MissionId,
        cancel: &CancellationToken,
    ) -> Result<MissionStatus, MissionError> {
        loop {
            let status = self.advance_with_cancel(mission_id, cancel).await?;
            if status.is_terminal() || status.is_suspended() {
                return Ok(status);
            }
        }
    }

    /// Cooperative pause: waits for an in-flight step, then stops.
    pub async fn pause(&self, mission_id: MissionId) -> Result<MissionStatus, MissionError> {
        let _guard = self.ledger.lock(mission_id).await;
        let mut projection = self.ledger.load(mission_id).await?;
        require_status(&projection.mission, MissionStatus::Running, "pause")?;

        self.ledger
            .commit(&mut projection, vec![MissionEventKind::MissionPaused])
            .await?;
        info!(mission_id = %mission_id, cursor = ?projection.mission.cursor(), "Mission paused");
        Ok(projection.status())
    }

    pub async fn resume(&self, mission_id: MissionId) -> Result<MissionStatus, MissionError> {
        let _guard = self.ledger.lock(mission_id).await;
        let mut projection = self.ledger.load(mission_id).await?;
        require_status(&projection.mission, MissionStatus::Paused, "resume")?;

        self.ledger
            .commit(&mut projection, vec![MissionEventKind::MissionResumed])
            .await?;
        info!(mission_id = %mission_id, "Mission resumed");
        Ok(projection.status())
    }

    /// Abort from any non-terminal status; a pending checkpoint is rejected.
    pub async fn abort(&self, mission_id: MissionId, reason: &str) -> Result<MissionStatus, MissionError> {
        let _guard = self.ledger.lock(mission_id).await;
        let mut projection = self.ledger.load(mission_id).await?;
        let mission = &projection.mission;
        if mission.status.is_terminal() {
            return Err(MissionError::InvalidTransition {
                mission_id,
                status: mission.status,
                action: "abort",
            });
        }

        let mut events = Vec::with_capacity(2);
        if let Some(checkpoint_id) = mission.pending_checkpoint {
            let mut response = CheckpointResponse::reject();
            response.note = Some(reason.to_string());
            events.push(MissionEventKind::CheckpointResolved {
                checkpoint_id,
                status: CheckpointStatus::Rejected,
                response,
            });
        }
        events.push(MissionEventKind::MissionAborted {
            reason: reason.to_string(),
            last_completed_step: mission.last_completed_step(),
        });

        self.ledger.commit(&mut projection, events).await?;
        warn!(mission_id = %mission_id, reason, "Mission aborted");
        Ok(projection.status())
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    pub async fn raise_checkpoint(
        &self,
        mission_id: MissionId,
        request: RaiseCheckpoint,
    ) -> Result<CheckpointId, MissionError> {
        let _guard = self.ledger.lock(mission_id).await;
        let mut projection = self.ledger.load(mission_id).await?;
        self.gate.raise(&mut projection, request).await
    }

    /// Apply a decision; the only way a mission leaves `checkpoint`.
    pub async fn resolve_checkpoint(
        &self,
        checkpoint_id: CheckpointId,
        response: CheckpointResponse,
    ) -> Result<MissionStatus, MissionError> {
        let mission_id = self
            .ledger
            .cache()
            .find_by_checkpoint(checkpoint_id)
            .await?
            .ok_or(MissionError::CheckpointNotFound(checkpoint_id))?;

        let _guard = self.ledger.lock(mission_id).await;
        let mut projection = self.ledger.load(mission_id).await?;
        self.gate.resolve(&mut projection, checkpoint_id, response).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_status(&self, mission_id: MissionId) -> Result<Mission, MissionError> {
        Ok(self.ledger.load(mission_id).await?.mission)
    }

    pub async fn get_projection(&self, mission_id: MissionId) -> Result<MissionProjection, MissionError> {
        self.ledger.load(mission_id).await
    }

    pub async fn pending_checkpoint(&self, mission_id: MissionId) -> Result<Option<Checkpoint>, MissionError> {
        let projection = self.ledger.load(mission_id).await?;
        Ok(projection.pending_checkpoint().cloned())
    }

    pub async fn list_artifacts(&self, mission_id: MissionId) -> Result<Vec<MissionArtifact>, MissionError> {
        Ok(self.ledger.load(mission_id).await?.artifacts)
    }

    /// Stored events with `sequence >= from_sequence`.
    pub async fn events(
        &self,
        mission_id: MissionId,
        from_sequence: u64,
    ) -> Result<Vec<MissionEvent>, MissionError> {
        if self.ledger.store().current_version(mission_id).await?.is_none() {
            return Err(MissionError::MissionNotFound(mission_id));
        }
        Ok(self.ledger.store().load(mission_id, from_sequence).await?)
    }

    /// Replay the log into the cache.
    pub async fn rebuild(&self, mission_id: MissionId) -> Result<MissionProjection, MissionError> {
        let _guard = self.ledger.lock(mission_id).await;
        let projection = self.ledger.rebuild(mission_id).await?;
        info!(mission_id = %mission_id, version = projection.version(), "Projection rebuilt");
        Ok(projection)
    }

    pub async fn list(&self) -> Result<Vec<MissionSummary>, MissionError> {
        Ok(self.ledger.cache().list().await?)
    }

    pub fn subscribe(&self, mission_id: MissionId, from_sequence: u64) -> MissionEventStream {
        self.ledger.bus().subscribe(mission_id, from_sequence)
    }

    // ========================================================================
    // Units of work
    // ========================================================================

    async fn brief(&self, projection: &mut MissionProjection) -> Result<MissionStatus, MissionError> {
        let mission_id = projection.mission.id;
        let constraints = self.plan_constraints();
        let plan = match self
            .planner
            .generate_plan(&projection.mission.objective, &constraints, projection.mission.seed)
            .await
        {
            Ok(plan) => plan,
            Err(e) => return self.fail(projection, format!("planning failed: {e}")).await,
        };

        let steps: Vec<PlanStep> = plan
            .drafts
            .into_iter()
            .enumerate()
            .map(|(position, draft)| {
                draft.into_step(
                    mission_id,
                    position,
                    &self.settings.default_strategy,
                    self.settings.max_step_attempts,
                )
            })
            .collect();
        let team = self.team.assemble_team(&steps, &self.agents);
        let steps: Vec<PlanStep> = steps
            .into_iter()
            .map(|mut step| {
                if let Some(agents) = team.assignments.get(&step.id) {
                    step.agents = agents.clone();
                }
                step
            })
            .collect();

        self.ledger
            .commit(
                projection,
                vec![MissionEventKind::PlanGenerated {
                    steps,
                    unassigned: team.unassigned.clone(),
                    cost: plan.usage.cost,
                }],
            )
            .await?;
        info!(
            mission_id = %mission_id,
            steps = projection.mission.steps.len(),
            unassigned = team.unassigned.len(),
            source = ?plan.source,
            "Plan generated"
        );

        if projection.mission.mode.requires_plan_approval() {
            let request = RaiseCheckpoint::new(
                CheckpointType::PlanApproval,
                format!(
                    "Approve the {}-step plan for: {}",
                    projection.mission.steps.len(),
                    projection.mission.objective
                ),
            )
            .with_context(plan_context(&projection.mission));
            self.gate.raise(projection, request).await?;
            return Ok(projection.status());
        }

        self.ledger
            .commit(projection, vec![MissionEventKind::MissionReady])
            .await?;

        let orphan = projection
            .mission
            .steps
            .iter()
            .find(|step| step.status == StepStatus::Failed)
            .cloned();
        if let Some(step) = orphan {
            let reason = step.error.clone().unwrap_or_else(|| UNASSIGNED_ERROR.to_string());
            self.gate
                .raise(projection, RaiseCheckpoint::risk_decision(&step, &reason))
                .await?;
        }
        Ok(projection.status())
    }

    async fn run_step(
        &self,
        projection: &mut MissionProjection,
        cancel: &CancellationToken,
    ) -> Result<MissionStatus, MissionError> {
        let mission_id = projection.mission.id;
        let Some(mut step) = projection.mission.current_step().cloned() else {
            return self.complete(projection).await;
        };

        if step.status == StepStatus::Failed {
            let reason = step.error.clone().unwrap_or_else(|| "step failed".to_string());
            self.gate
                .raise(projection, RaiseCheckpoint::risk_decision(&step, &reason))
                .await?;
            return Ok(projection.status());
        }

        if step.agents.is_empty() {
            let chosen = self.team.select(&step, &self.agents);
            if chosen.is_empty() {
                warn!(mission_id = %mission_id, step_id = %step.id, "No agent can take step");
                self.ledger
                    .commit(
                        projection,
                        vec![MissionEventKind::StepFailed {
                            step_id: step.id,
                            error: UNASSIGNED_ERROR.to_string(),
                            cost: 0.0,
                        }],
                    )
                    .await?;
                self.gate
                    .raise(projection, RaiseCheckpoint::risk_decision(&step, UNASSIGNED_ERROR))
                    .await?;
                return Ok(projection.status());
            }
            self.ledger
                .commit(
                    projection,
                    vec![MissionEventKind::StepAssigned {
                        step_id: step.id,
                        agents: chosen.clone(),
                    }],
                )
                .await?;
            info!(mission_id = %mission_id, step_id = %step.id, agents = ?chosen, "Step reassigned");
            step.agents = chosen;
        }

        if let Some(gate) = self.gate_for(&projection.mission, &step, GateTiming::Before) {
            if !step.approved {
                self.gate
                    .raise(
                        projection,
                        RaiseCheckpoint::step_gate(&step, gate, GateTiming::Before),
                    )
                    .await?;
                return Ok(projection.status());
            }
        }

        if !projection.mission.within_budget() {
            let (spent, limit) = (projection.mission.budget_spent, projection.mission.budget_limit);
            self.record_failure(projection, format!("budget exceeded: spent {spent:.4} of {limit:.4}"))
                .await?;
            return Err(MissionError::BudgetExceeded {
                mission_id,
                spent,
                limit,
            });
        }

        let attempt = step.attempts + 1;
        self.ledger
            .commit(
                projection,
                vec![MissionEventKind::StepStarted {
                    step_id: step.id,
                    attempt,
                }],
            )
            .await?;
        info!(
            mission_id = %mission_id,
            step_id = %step.id,
            position = step.position,
            attempt,
            strategy = %step.policy.strategy,
            "Step started"
        );

        let agents = self.profiles(&step);
        match self
            .executor
            .execute(&projection.mission, &step, &agents, cancel)
            .await
        {
            Ok(execution) => {
                let mut events = vec![MissionEventKind::StepCompleted {
                    step_id: step.id,
                    result: execution.result.clone(),
                    cost: execution.usage.cost,
                }];
                if let Some(artifact_type) = step.policy.produces {
                    events.push(MissionEventKind::ArtifactProduced {
                        artifact: MissionArtifact::new(
                            mission_id,
                            Some(step.id),
                            artifact_type,
                            step.description.clone(),
                            execution.result.output.clone(),
                        ),
                    });
                }
                self.ledger.commit(projection, events).await?;
                info!(
                    mission_id = %mission_id,
                    step_id = %step.id,
                    confidence = execution.result.confidence,
                    cost = execution.usage.cost,
                    "Step completed"
                );

                if let Some(gate) = self.gate_for(&projection.mission, &step, GateTiming::After) {
                    let completed = projection.mission.step(step.id).cloned().unwrap_or(step);
                    self.gate
                        .raise(
                            projection,
                            RaiseCheckpoint::step_gate(&completed, gate, GateTiming::After),
                        )
                        .await?;
                }
                Ok(projection.status())
            }
            Err(StepExecutionError::Cancelled { cost }) => {
                self.ledger
                    .commit(
                        projection,
                        vec![MissionEventKind::StepRequeued {
                            step_id: step.id,
                            reason: "cancelled".to_string(),
                            reset_attempts: false,
                            cost,
                        }],
                    )
                    .await?;
                warn!(mission_id = %mission_id, step_id = %step.id, "Step cancelled and requeued");
                Err(MissionError::Cancelled(mission_id))
            }
            Err(StepExecutionError::Failed { reason, cost, .. }) => {
                self.step_failed(projection, &step, reason, cost).await
            }
        }
    }

    async fn step_failed(
        &self,
        projection: &mut MissionProjection,
        step: &PlanStep,
        reason: String,
        cost: f64,
    ) -> Result<MissionStatus, MissionError> {
        let mission_id = projection.mission.id;
        warn!(
            mission_id = %mission_id,
            step_id = %step.id,
            attempt = step.attempts + 1,
            error = %reason,
            "Step failed"
        );
        let failed = MissionEventKind::StepFailed {
            step_id: step.id,
            error: reason.clone(),
            cost,
        };

        if step.policy.critical {
            let mission_reason = format!("critical step {} failed: {}", step.position + 1, reason);
            let events = vec![
                failed,
                MissionEventKind::MissionFailed {
                    reason: mission_reason.clone(),
                    last_completed_step: projection.mission.last_completed_step(),
                    last_checkpoint: projection.last_checkpoint(),
                },
            ];
            self.ledger.commit(projection, events).await?;
            error!(mission_id = %mission_id, reason = %mission_reason, "Mission failed");
            return Err(MissionError::MissionFailed {
                mission_id,
                reason: mission_reason,
            });
        }

        let retry = projection
            .mission
            .step(step.id)
            .is_some_and(|current| current.attempts_remaining());
        if retry {
            self.ledger
                .commit(
                    projection,
                    vec![
                        failed,
                        MissionEventKind::StepRequeued {
                            step_id: step.id,
                            reason,
                            reset_attempts: false,
                            cost: 0.0,
                        },
                    ],
                )
                .await?;
            return Ok(projection.status());
        }

        self.ledger.commit(projection, vec![failed]).await?;
        let current = projection.mission.step(step.id).cloned().unwrap_or_else(|| step.clone());
        self.gate
            .raise(projection, RaiseCheckpoint::risk_decision(&current, &reason))
            .await?;
        Ok(projection.status())
    }

    async fn complete(&self, projection: &mut MissionProjection) -> Result<MissionStatus, MissionError> {
        let synthesis = synthesize(&projection.mission);
        let synthesis_id = synthesis.id;
        self.ledger
            .commit(
                projection,
                vec![
                    MissionEventKind::ArtifactProduced { artifact: synthesis },
                    MissionEventKind::MissionCompleted {
                        synthesis: synthesis_id,
                    },
                ],
            )
            .await?;
        info!(
            mission_id = %projection.mission.id,
            artifacts = projection.artifacts.len(),
            budget_spent = projection.mission.budget_spent,
            "Mission completed"
        );
        Ok(projection.status())
    }

    /// Append `mission_failed` and report it as an error.
    async fn fail(
        &self,
        projection: &mut MissionProjection,
        reason: String,
    ) -> Result<MissionStatus, MissionError> {
        self.record_failure(projection, reason.clone()).await?;
        Err(MissionError::MissionFailed {
            mission_id: projection.mission.id,
            reason,
        })
    }

    async fn record_failure(
        &self,
        projection: &mut MissionProjection,
        reason: String,
    ) -> Result<(), MissionError> {
        let mission_id = projection.mission.id;
        let event = MissionEventKind::MissionFailed {
            reason: reason.clone(),
            last_completed_step: projection.mission.last_completed_step(),
            last_checkpoint: projection.last_checkpoint(),
        };
        self.ledger.commit(projection, vec![event]).await?;
        error!(mission_id = %mission_id, reason = %reason, "Mission failed");
        Ok(())
    }

    fn gate_for(&self, mission: &Mission, step: &PlanStep, timing: GateTiming) -> Option<CheckpointType> {
        if !mission.mode.honors_step_gates() {
            return None;
        }
        step.policy
            .approval
            .as_ref()
            .filter(|gate| gate.timing == timing)
            .map(|gate| gate.checkpoint_type)
    }

    fn plan_constraints(&self) -> PlanConstraints {
        let mut capabilities: Vec<String> = self
            .agents
            .iter()
            .flat_map(|agent| agent.capabilities.iter().cloned())
            .collect();
        capabilities.sort();
        capabilities.dedup();

        PlanConstraints {
            max_steps: self.settings.max_steps,
            default_strategy: self.settings.default_strategy.clone(),
            default_max_attempts: self.settings.max_step_attempts,
            strategies: self.strategies.names(),
            capabilities,
        }
    }

    /// Configured profiles of the step's agents, in assignment order.
    fn profiles(&self, step: &PlanStep) -> Vec<AgentProfile> {
        step.agents
            .iter()
            .filter_map(|id| {
                let profile = self.agents.iter().find(|agent| &agent.id == id).cloned();
                if profile.is_none() {
                    warn!(step_id = %step.id, agent = %id, "Assigned agent is not configured");
                }
                profile
            })
            .collect()
    }
}

fn require_status(mission: &Mission, expected: MissionStatus, action: &'static str) -> Result<(), MissionError> {
    if mission.status != expected {
        return Err(MissionError::InvalidTransition {
            mission_id: mission.id,
            status: mission.status,
            action,
        });
    }
    Ok(())
}

fn plan_context(mission: &Mission) -> serde_json::Value {
    let steps: Vec<serde_json::Value> = mission
        .steps
        .iter()
        .map(|step| {
            serde_json::json!({
                "position": step.position,
                "description": step.description,
                "agents": step.agents,
                "strategy": step.policy.strategy,
                "parallel": step.policy.parallel,
                "critical": step.policy.critical,
                "status": step.status,
            })
        })
        .collect();
    serde_json::json!({ "objective": mission.objective, "steps": steps })
}

/// Markdown synthesis of every step output, in plan order.
pub fn synthesize(mission: &Mission) -> MissionArtifact {
    let mut content = format!("# Mission synthesis\n\n**Objective:** {}\n", mission.objective);
    for step in &mission.steps {
        content.push_str(&format!("\n## Step {}: {}\n\n", step.position + 1, step.description));
        match &step.result {
            Some(result) if result.skipped => content.push_str("_Skipped._\n"),
            Some(result) => {
                content.push_str(result.output.trim());
                content.push_str(&format!("\n\n_Confidence: {:.2}_\n", result.confidence));
            }
            None => content.push_str("_No result._\n"),
        }
    }

    MissionArtifact::new(
        mission.id,
        None,
        ArtifactType::Synthesis,
        format!("Synthesis: {}", mission.objective),
        content,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::strategies::testing::Canned;
    use crate::domain::agent::AgentId;
    use crate::domain::engine_config::EngineConfigManifest;
    use crate::infrastructure::repositories::{InMemoryMissionEventStore, InMemoryMissionRepository};
    use crate::infrastructure::resilience::{CircuitBreakerConfig, ResilienceLayer, RetryPolicy};

    const PLAN: &str = r#"{"steps": [{"description": "Collect the figures"}, {"description": "Write the summary"}]}"#;

    fn engine(provider: Canned) -> MissionEngine {
        let mut config = EngineConfigManifest::default().spec;
        config.engine.seed = Some(3);
        config.agents = vec![AgentProfile::new(AgentId::new("worker").unwrap(), "local")];

        let resilience = Arc::new(ResilienceLayer::new(
            RetryPolicy::immediate(1),
            CircuitBreakerConfig::default(),
        ));
        let mut providers = ProviderRegistry::new(resilience);
        providers.register("local", Arc::new(provider));

        MissionEngine::new(
            &config,
            Arc::new(providers),
            Arc::new(InMemoryMissionEventStore::new()),
            Arc::new(InMemoryMissionRepository::new()),
        )
    }

    fn scripted() -> Canned {
        Canned::new()
            .on("Break the objective", &[PLAN])
            .on("Current step: Collect", &["12 invoices"])
            .on("Current step: Write", &["Answer: 12 invoices reviewed"])
    }

    #[tokio::test]
    async fn test_submit_validates_objective_and_budget() {
        let engine = engine(scripted());

        let empty = engine
            .submit(SubmitRequest::new("   ", MissionMode::AutonomousAutomatic))
            .await
            .unwrap_err();
        assert!(matches!(empty, MissionError::InvalidObjective(_)));

        let long = "x".repeat(engine.settings.max_objective_chars + 1);
        let too_long = engine
            .submit(SubmitRequest::new(long, MissionMode::AutonomousAutomatic))
            .await
            .unwrap_err();
        assert!(matches!(too_long, MissionError::InvalidObjective(_)));

        let budget = engine
            .submit(SubmitRequest::new("Audit", MissionMode::AutonomousAutomatic).with_budget(f64::NAN))
            .await
            .unwrap_err();
        assert!(matches!(budget, MissionError::InvalidBudget(_)));

        let id = engine
            .submit(SubmitRequest::new("  Audit invoices ", MissionMode::AutonomousAutomatic))
            .await
            .unwrap();
        let mission = engine.get_status(id).await.unwrap();
        assert_eq!(mission.objective, "Audit invoices");
        assert_eq!(mission.status, MissionStatus::Draft);
        assert_eq!(mission.seed, 3);
    }

    #[tokio::test]
    async fn test_drive_completes_with_synthesis() {
        let engine = engine(scripted());
        let id = engine
            .submit(SubmitRequest::new("Audit invoices", MissionMode::AutonomousAutomatic))
            .await
            .unwrap();

        let status = engine.drive(id).await.unwrap();
        assert_eq!(status, MissionStatus::Completed);

        let artifacts = engine.list_artifacts(id).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].artifact_type, ArtifactType::Synthesis);
        assert!(artifacts[0].content.contains("## Step 1: Collect the figures\n\n12 invoices"));
        assert!(artifacts[0].content.contains("Answer: 12 invoices reviewed"));
    }

    #[tokio::test]
    async fn test_lifecycle_controls_check_status() {
        let engine = engine(scripted());
        let id = engine
            .submit(SubmitRequest::new("Audit invoices", MissionMode::AutonomousAutomatic))
            .await
            .unwrap();

        let err = engine.resume(id).await.unwrap_err();
        assert!(matches!(err, MissionError::InvalidTransition { action: "resume", .. }));
        let err = engine.pause(id).await.unwrap_err();
        assert!(matches!(err, MissionError::InvalidTransition { action: "pause", .. }));

        assert_eq!(engine.abort(id, "not needed").await.unwrap(), MissionStatus::Aborted);
        let err = engine.abort(id, "again").await.unwrap_err();
        assert!(matches!(err, MissionError::InvalidTransition { action: "abort", .. }));
        assert_eq!(engine.advance(id).await.unwrap(), MissionStatus::Aborted);
    }

    #[tokio::test]
    async fn test_interactive_mode_waits_for_plan_approval() {
        let engine = engine(scripted());
        let id = engine
            .submit(SubmitRequest::new("Audit invoices", MissionMode::InteractiveAutomatic))
            .await
            .unwrap();

        assert_eq!(engine.advance(id).await.unwrap(), MissionStatus::Checkpoint);
        let checkpoint = engine.pending_checkpoint(id).await.unwrap().unwrap();
        assert_eq!(checkpoint.checkpoint_type, CheckpointType::PlanApproval);
        assert_eq!(checkpoint.resume_to, MissionStatus::Ready);

        let status = engine
            .resolve_checkpoint(checkpoint.id, CheckpointResponse::approve())
            .await
            .unwrap();
        assert_eq!(status, MissionStatus::Ready);
        assert_eq!(engine.drive(id).await.unwrap(), MissionStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_mission_and_checkpoint() {
        let engine = engine(scripted());
        let missing = MissionId::new();
        assert!(matches!(
            engine.advance(missing).await.unwrap_err(),
            MissionError::MissionNotFound(_)
        ));
        assert!(matches!(
            engine.events(missing, 1).await.unwrap_err(),
            MissionError::MissionNotFound(_)
        ));
        assert!(matches!(
            engine
                .resolve_checkpoint(CheckpointId::new(), CheckpointResponse::approve())
                .await
                .unwrap_err(),
            MissionError::CheckpointNotFound(_)
        ));
    }

    #[test]
    fn test_synthesis_marks_skipped_steps() {
        let mut step = crate::domain::plan::PlanStepDraft::new("Translate").into_step(
            MissionId::new(),
            0,
            "direct",
            2,
        );
        step.result = Some(crate::domain::plan::StepResult::skipped());
        let mission = Mission {
            id: step.mission_id,
            objective: "Ship it".into(),
            mode: MissionMode::AutonomousAutomatic,
            status: MissionStatus::Running,
            steps: vec![step],
            step_history: vec![],
            assigned_agents: Default::default(),
            budget_limit: 1.0,
            budget_spent: 0.0,
            seed: 0,
            user_context: serde_json::Value::Null,
            version: 4,
            pending_checkpoint: None,
            reason: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let artifact = synthesize(&mission);
        assert_eq!(artifact.title, "Synthesis: Ship it");
        assert!(artifact.content.contains("## Step 1: Translate\n\n_Skipped._"));
    }
}
