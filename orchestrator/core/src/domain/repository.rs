// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the mission aggregate. The event store is the
//! source of truth; the mission repository holds a materialized cache of the
//! folded projection that can be rebuilt from the log at any time.
//!
//! | Trait | Holds | Implementations |
//! |-------|-------|----------------|
//! | `MissionEventStore` | append-only `MissionEvent` log | `InMemoryMissionEventStore`, `PostgresMissionEventStore` |
//! | `MissionRepository` | `MissionProjection` cache + checkpoint index | `InMemoryMissionRepository`, `PostgresMissionRepository` |
//!
//! Concrete implementations are selected at startup from the `persistence`
//! section of the engine configuration.

use async_trait::async_trait;

use crate::domain::checkpoint::CheckpointId;
use crate::domain::events::MissionEvent;
use crate::domain::mission::{MissionId, MissionStatus};
use crate::domain::projection::MissionProjection;

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Append-only, per-mission ordered event log.
#[async_trait]
pub trait MissionEventStore: Send + Sync {
    /// Append `events` if the mission's last stored sequence equals
    /// `expected_version` (0 for a new mission). Events must carry sequences
    /// `expected_version + 1 ..` in order.
    async fn append(
        &self,
        mission_id: MissionId,
        expected_version: u64,
        events: &[MissionEvent],
    ) -> Result<(), RepositoryError>;

    /// Events with `sequence >= from_sequence`, in order.
    async fn load(
        &self,
        mission_id: MissionId,
        from_sequence: u64,
    ) -> Result<Vec<MissionEvent>, RepositoryError>;

    /// Sequence of the last stored event, `None` if the mission is unknown.
    async fn current_version(&self, mission_id: MissionId) -> Result<Option<u64>, RepositoryError>;
}

/// Materialized projection cache.
#[async_trait]
pub trait MissionRepository: Send + Sync {
    /// Save projection (create or update)
    async fn save(&self, projection: &MissionProjection) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: MissionId) -> Result<Option<MissionProjection>, RepositoryError>;

    /// Resolve the mission that owns a checkpoint.
    async fn find_by_checkpoint(
        &self,
        checkpoint_id: CheckpointId,
    ) -> Result<Option<MissionId>, RepositoryError>;

    /// Summaries of every cached mission, newest first.
    async fn list(&self) -> Result<Vec<MissionSummary>, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MissionSummary {
    pub id: MissionId,
    pub objective: String,
    pub status: MissionStatus,
    pub version: u64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&MissionProjection> for MissionSummary {
    fn from(projection: &MissionProjection) -> Self {
        Self {
            id: projection.mission.id,
            objective: projection.mission.objective.clone(),
            status: projection.mission.status,
            version: projection.mission.version,
            updated_at: projection.mission.updated_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Version conflict for mission {mission_id}: expected {expected}, found {actual}")]
    Conflict {
        mission_id: MissionId,
        expected: u64,
        actual: u64,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
