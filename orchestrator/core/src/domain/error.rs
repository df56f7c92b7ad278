// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy for the mission engine and checkpoint gate.

use std::time::Duration;

use crate::domain::checkpoint::CheckpointId;
use crate::domain::llm::ProviderError;
use crate::domain::mission::{MissionId, MissionStatus};
use crate::domain::plan::StepId;
use crate::domain::projection::ProjectionError;
use crate::domain::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum MissionError {
    #[error("Invalid objective: {0}")]
    InvalidObjective(String),

    #[error("Invalid budget: {0}")]
    InvalidBudget(String),

    #[error("Mission not found: {0}")]
    MissionNotFound(MissionId),

    #[error("Invalid transition for mission {mission_id}: cannot {action} while {status}")]
    InvalidTransition {
        mission_id: MissionId,
        status: MissionStatus,
        action: &'static str,
    },

    #[error("Budget exceeded for mission {mission_id}: spent {spent:.4} of {limit:.4}")]
    BudgetExceeded {
        mission_id: MissionId,
        spent: f64,
        limit: f64,
    },

    #[error("Mission {mission_id} already has pending checkpoint {checkpoint_id}")]
    CheckpointAlreadyPending {
        mission_id: MissionId,
        checkpoint_id: CheckpointId,
    },

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(CheckpointId),

    #[error("Checkpoint already resolved: {0}")]
    CheckpointAlreadyResolved(CheckpointId),

    #[error("Invalid checkpoint response: {0}")]
    InvalidCheckpointResponse(String),

    #[error("Provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("Circuit open for provider '{provider}', retry in {retry_after:?}")]
    CircuitOpenError {
        provider: String,
        retry_after: Duration,
    },

    #[error("Step {step_id} failed: {reason}")]
    StepFailed { step_id: StepId, reason: String },

    #[error("Mission {mission_id} failed: {reason}")]
    MissionFailed { mission_id: MissionId, reason: String },

    #[error("Unknown reasoning strategy '{0}'")]
    UnknownStrategy(String),

    #[error("Concurrent modification of mission {0}; reload and retry")]
    VersionConflict(MissionId),

    #[error("Operation on mission {0} was cancelled")]
    Cancelled(MissionId),

    #[error("Event log invariant violated: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Repository error: {0}")]
    Repository(RepositoryError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<RepositoryError> for MissionError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict { mission_id, .. } => MissionError::VersionConflict(mission_id),
            other => MissionError::Repository(other),
        }
    }
}

impl MissionError {
    /// Map a provider error that escaped the resilience layer.
    pub fn from_provider(provider: &str, err: ProviderError) -> Self {
        match err {
            ProviderError::CircuitOpen {
                provider,
                retry_after,
            } => MissionError::CircuitOpenError {
                provider,
                retry_after,
            },
            other => MissionError::ProviderUnavailable {
                provider: provider.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
