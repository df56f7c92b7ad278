// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the persistence contracts defined in
//! `domain::repository`, following the Repository pattern from DDD.
//!
//! # Available Implementations
//!
//! ## PostgreSQL
//!
//! - **PostgresMissionEventStore** - append-only `mission_events` table,
//!   optimistic concurrency via the `(mission_id, sequence)` primary key
//! - **PostgresMissionRepository** - JSONB projection cache plus the
//!   checkpoint-to-mission index
//!
//! ## In-Memory
//!
//! Lightweight implementations for tests, demos and single-process runs:
//! - **InMemoryMissionEventStore**
//! - **InMemoryMissionRepository**
//!
//! # Design Principles
//!
//! 1. **Log is truth**: the projection cache can be dropped and rebuilt
//! 2. **Atomic appends**: a batch of events is stored entirely or not at all
//! 3. **Error Mapping**: infrastructure errors mapped to domain `RepositoryError`

pub mod postgres_mission;

pub use postgres_mission::{PostgresMissionEventStore, PostgresMissionRepository};

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::checkpoint::CheckpointId;
use crate::domain::events::MissionEvent;
use crate::domain::mission::MissionId;
use crate::domain::projection::MissionProjection;
use crate::domain::repository::{
    MissionEventStore, MissionRepository, MissionSummary, RepositoryError,
};

/// Check that `events` continue the log at `expected_version + 1` for `mission_id`.
pub(crate) fn validate_batch(
    mission_id: MissionId,
    expected_version: u64,
    events: &[MissionEvent],
) -> Result<(), RepositoryError> {
    for (offset, event) in events.iter().enumerate() {
        let sequence = expected_version + offset as u64 + 1;
        if event.mission_id != mission_id || event.sequence != sequence {
            return Err(RepositoryError::Unknown(format!(
                "event {} does not continue mission {} at sequence {}",
                event.id, mission_id, sequence
            )));
        }
    }
    Ok(())
}

#[derive(Clone, Default)]
pub struct InMemoryMissionEventStore {
    logs: Arc<RwLock<HashMap<MissionId, Vec<MissionEvent>>>>,
}

impl InMemoryMissionEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MissionEventStore for InMemoryMissionEventStore {
    async fn append(
        &self,
        mission_id: MissionId,
        expected_version: u64,
        events: &[MissionEvent],
    ) -> Result<(), RepositoryError> {
        validate_batch(mission_id, expected_version, events)?;

        let mut logs = self.logs.write();
        let log = logs.entry(mission_id).or_default();
        let actual = log.len() as u64;
        if actual != expected_version {
            return Err(RepositoryError::Conflict {
                mission_id,
                expected: expected_version,
                actual,
            });
        }
        log.extend_from_slice(events);
        Ok(())
    }

    async fn load(
        &self,
        mission_id: MissionId,
        from_sequence: u64,
    ) -> Result<Vec<MissionEvent>, RepositoryError> {
        let logs = self.logs.read();
        Ok(logs
            .get(&mission_id)
            .map(|log| {
                log.iter()
                    .filter(|event| event.sequence >= from_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn current_version(&self, mission_id: MissionId) -> Result<Option<u64>, RepositoryError> {
        let logs = self.logs.read();
        Ok(logs
            .get(&mission_id)
            .filter(|log| !log.is_empty())
            .map(|log| log.len() as u64))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryMissionRepository {
    projections: Arc<RwLock<HashMap<MissionId, MissionProjection>>>,
    checkpoints: Arc<RwLock<HashMap<CheckpointId, MissionId>>>,
}

impl InMemoryMissionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a cached projection, leaving the event log untouched.
    pub fn evict(&self, id: MissionId) {
        self.projections.write().remove(&id);
    }
}

#[async_trait]
impl MissionRepository for InMemoryMissionRepository {
    async fn save(&self, projection: &MissionProjection) -> Result<(), RepositoryError> {
        let mission_id = projection.mission.id;
        {
            let mut checkpoints = self.checkpoints.write();
            for checkpoint in &projection.checkpoints {
                checkpoints.insert(checkpoint.id, mission_id);
            }
        }
        self.projections
            .write()
            .insert(mission_id, projection.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: MissionId) -> Result<Option<MissionProjection>, RepositoryError> {
        Ok(self.projections.read().get(&id).cloned())
    }

    async fn find_by_checkpoint(
        &self,
        checkpoint_id: CheckpointId,
    ) -> Result<Option<MissionId>, RepositoryError> {
        Ok(self.checkpoints.read().get(&checkpoint_id).copied())
    }

    async fn list(&self) -> Result<Vec<MissionSummary>, RepositoryError> {
        let projections = self.projections.read();
        let mut summaries: Vec<MissionSummary> =
            projections.values().map(MissionSummary::from).collect();
        // Newest first
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}
