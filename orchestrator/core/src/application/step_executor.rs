// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Step executor: fan-out / fan-in
//!
//! Runs one plan step. Every dispatched agent gets its own spawned task that
//! runs the step's strategy against the agent's provider under a per-branch
//! timeout, so a panicking or hanging branch never takes its siblings down.
//! Fan-in normalizes the successful answers, takes the plurality and scores
//! it as the summed confidence of the agreeing branches over the number of
//! branches dispatched; partial success degrades confidence instead of
//! failing the step.
//!
//! The step is billed for every provider call any branch completed, whether
//! that branch succeeded, failed, timed out or was cancelled. Branch tasks are
//! aborted when the execution future is dropped.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

use crate::application::strategies::{
    derive_seed, normalize_answer, plurality, ReasoningStrategy, StrategyContext, StrategyError,
    StrategyInput, StrategyOutcome, StrategyRegistry, UsageMeter,
};
use crate::domain::agent::AgentProfile;
use crate::domain::error::MissionError;
use crate::domain::llm::TokenUsage;
use crate::domain::mission::Mission;
use crate::domain::plan::{BranchOutcome, PlanStep, StepId, StepResult, StepStatus, TraceEntry};
use crate::infrastructure::llm::ProviderRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct StepExecution {
    pub result: StepResult,
    pub usage: TokenUsage,
}

#[derive(Debug, thiserror::Error)]
pub enum StepExecutionError {
    #[error("{reason}")]
    Failed {
        reason: String,
        branches: Vec<BranchOutcome>,
        cost: f64,
    },

    #[error("Step execution cancelled")]
    Cancelled { cost: f64 },
}

type BranchResult = Result<Result<StrategyOutcome, StrategyError>, tokio::time::error::Elapsed>;

pub struct StepExecutor {
    providers: Arc<ProviderRegistry>,
    strategies: Arc<StrategyRegistry>,
    default_strategy: String,
    branch_timeout: Duration,
}

impl StepExecutor {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        strategies: Arc<StrategyRegistry>,
        default_strategy: impl Into<String>,
        branch_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            strategies,
            default_strategy: default_strategy.into(),
            branch_timeout,
        }
    }

    /// Execute `step` with its assigned `agents`; sequential steps use only the first.
    pub async fn execute(
        &self,
        mission: &Mission,
        step: &PlanStep,
        agents: &[AgentProfile],
        cancel: &CancellationToken,
    ) -> Result<StepExecution, StepExecutionError> {
        let dispatched: &[AgentProfile] = if step.policy.parallel {
            agents
        } else {
            &agents[..agents.len().min(1)]
        };
        if dispatched.is_empty() {
            return Err(StepExecutionError::Failed {
                reason: "no agents assigned".to_string(),
                branches: Vec::new(),
                cost: 0.0,
            });
        }

        let timeout = step.policy.branch_timeout.unwrap_or(self.branch_timeout);
        let input = StrategyInput::new(step_prompt(mission, step)).with_parameters(step.parameters.clone());

        let mut handles = Vec::with_capacity(dispatched.len());
        let mut meters: Vec<UsageMeter> = Vec::with_capacity(dispatched.len());
        let mut immediate: Vec<Option<String>> = Vec::with_capacity(dispatched.len());
        for (branch, agent) in dispatched.iter().enumerate() {
            let prepared = self.prepare_branch(mission, step, agent, branch);
            match prepared {
                Ok((strategy, context)) => {
                    let input = input.clone();
                    meters.push(context.meter.clone());
                    handles.push(AbortOnDropHandle::new(tokio::spawn(async move {
                        tokio::time::timeout(timeout, strategy.run(&input, &context)).await
                    })));
                    immediate.push(None);
                }
                Err(reason) => immediate.push(Some(reason)),
            }
        }
        let spent = || {
            meters.iter().fold(TokenUsage::default(), |mut total, meter| {
                total.add(&meter.total());
                total
            })
        };

        let aborts: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();
        let running = join_all(handles);
        let mut joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                for abort in &aborts {
                    abort.abort();
                }
                let cost = spent().cost;
                warn!(step_id = %step.id, cost, "Step cancelled with branches in flight");
                return Err(StepExecutionError::Cancelled { cost });
            }
            results = running => results.into_iter(),
        };

        let mut branches = Vec::with_capacity(dispatched.len());
        let mut successes: Vec<(StrategyOutcome, String)> = Vec::new();

        for (agent, setup_error) in dispatched.iter().zip(immediate) {
            let result = match setup_error {
                Some(reason) => Err(reason),
                None => match joined.next() {
                    Some(joined) => branch_result(step.id, joined, timeout),
                    None => Err("branch result missing".to_string()),
                },
            };

            match result {
                Ok(outcome) => {
                    branches.push(BranchOutcome {
                        agent: agent.id.clone(),
                        succeeded: true,
                        answer: Some(outcome.result.clone()),
                        confidence: outcome.confidence,
                        error: None,
                    });
                    let normalized = normalize_answer(&outcome.result);
                    successes.push((outcome, normalized));
                }
                Err(reason) => {
                    warn!(step_id = %step.id, agent = %agent.id, error = %reason, "Branch failed");
                    branches.push(BranchOutcome {
                        agent: agent.id.clone(),
                        succeeded: false,
                        answer: None,
                        confidence: 0.0,
                        error: Some(reason),
                    });
                }
            }
        }
        let usage = spent();

        let Some((winner, votes)) = plurality(successes.iter().map(|(_, n)| n.as_str())) else {
            let reason = branches
                .iter()
                .filter_map(|branch| {
                    branch
                        .error
                        .as_ref()
                        .map(|error| format!("{}: {}", branch.agent, error))
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(StepExecutionError::Failed {
                reason,
                branches,
                cost: usage.cost,
            });
        };

        let agreeing = &successes[winner].1;
        let agreement: f64 = successes
            .iter()
            .filter(|(_, normalized)| normalized == agreeing)
            .map(|(outcome, _)| outcome.confidence.clamp(0.0, 1.0))
            .sum();
        let confidence = agreement / dispatched.len() as f64;
        debug!(
            step_id = %step.id,
            dispatched = dispatched.len(),
            succeeded = successes.len(),
            votes,
            confidence,
            "Branches joined"
        );

        let (outcome, _) = successes.swap_remove(winner);
        let mut trace = outcome.trace;
        if dispatched.len() > 1 {
            trace.push(TraceEntry::scored(
                "fan-in",
                format!(
                    "{} of {} branches agree ({} failed)",
                    votes,
                    dispatched.len(),
                    dispatched.len() - successes.len() - 1
                ),
                confidence,
            ));
        }

        Ok(StepExecution {
            result: StepResult {
                output: outcome.result,
                confidence,
                branches,
                trace,
                skipped: false,
            },
            usage,
        })
    }

    fn prepare_branch(
        &self,
        mission: &Mission,
        step: &PlanStep,
        agent: &AgentProfile,
        branch: usize,
    ) -> Result<(Arc<dyn ReasoningStrategy>, StrategyContext), String> {
        let provider = self
            .providers
            .get(&agent.provider)
            .ok_or_else(|| format!("provider '{}' is not registered", agent.provider))?;

        let name = match &agent.strategy {
            Some(preferred) if step.policy.strategy == self.default_strategy => preferred.as_str(),
            _ => step.policy.strategy.as_str(),
        };
        let strategy = self
            .strategies
            .get(name)
            .map_err(|e| MissionError::from(e).to_string())?;

        let seed = derive_seed(mission.seed, step.position, step.revision, branch);
        let context = StrategyContext::new(
            agent.provider.clone(),
            provider,
            seed,
            self.strategies.clone(),
        );
        Ok((strategy, context))
    }
}

fn branch_result(
    step_id: StepId,
    joined: Result<BranchResult, tokio::task::JoinError>,
    timeout: Duration,
) -> Result<StrategyOutcome, String> {
    match joined {
        Ok(Ok(Ok(outcome))) => Ok(outcome),
        Ok(Ok(Err(e))) => Err(strategy_failure(step_id, e).to_string()),
        Ok(Err(_)) => Err(format!("branch timed out after {}", seconds(timeout))),
        Err(e) if e.is_panic() => Err("branch panicked".to_string()),
        Err(e) => Err(format!("branch task failed: {e}")),
    }
}

fn seconds(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

/// Engine-level meaning of a strategy error raised while running `step_id`.
pub fn strategy_failure(step_id: StepId, err: StrategyError) -> MissionError {
    match err {
        StrategyError::NoResult { strategy, reason } => MissionError::StepFailed {
            step_id,
            reason: format!("{strategy}: {reason}"),
        },
        other => other.into(),
    }
}

impl From<StrategyError> for MissionError {
    fn from(err: StrategyError) -> Self {
        match err {
            StrategyError::Provider { provider, source } => MissionError::from_provider(&provider, source),
            StrategyError::UnknownStrategy(name) => MissionError::UnknownStrategy(name),
            StrategyError::NoResult { strategy, reason } => {
                MissionError::Configuration(format!("strategy '{strategy}' produced no result: {reason}"))
            }
        }
    }
}

/// Prompt for one step: the objective, what earlier steps produced and the
/// step itself. Deterministic for a given mission state.
pub fn step_prompt(mission: &Mission, step: &PlanStep) -> String {
    let mut prompt = format!("Mission objective:\n{}\n", mission.objective);

    let earlier: Vec<&PlanStep> = mission
        .steps
        .iter()
        .filter(|other| other.position < step.position && other.status == StepStatus::Completed)
        .collect();
    if !earlier.is_empty() {
        prompt.push_str("\nCompleted so far:\n");
        for other in earlier {
            let output = other
                .result
                .as_ref()
                .filter(|result| !result.skipped)
                .map(|result| result.output.as_str())
                .unwrap_or("(skipped)");
            prompt.push_str(&format!("- [{}] {}\n", other.position + 1, output));
        }
    }

    prompt.push_str(&format!(
        "\nStep {} of {}\nCurrent step: {}\n",
        step.position + 1,
        mission.steps.len(),
        step.description
    ));
    if !step.parameters.is_null() {
        prompt.push_str(&format!("\nParameters:\n{}\n", step.parameters));
    }
    prompt
}
