// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL implementations of the mission event store and projection cache.
//!
//! Events are stored as JSONB envelopes in `mission_events`; the composite
//! primary key `(mission_id, sequence)` turns a lost optimistic-concurrency
//! race into a unique violation, reported as `RepositoryError::Conflict`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::domain::checkpoint::CheckpointId;
use crate::domain::events::MissionEvent;
use crate::domain::mission::MissionId;
use crate::domain::projection::MissionProjection;
use crate::domain::repository::{
    MissionEventStore, MissionRepository, MissionSummary, RepositoryError,
};

use super::validate_batch;

pub struct PostgresMissionEventStore {
    pool: PgPool,
}

impl PostgresMissionEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// `BIGINT` lower bound for a replay offset; `None` lies past every stored sequence.
fn sequence_bound(from_sequence: u64) -> Option<i64> {
    i64::try_from(from_sequence).ok()
}

#[async_trait]
impl MissionEventStore for PostgresMissionEventStore {
    async fn append(
        &self,
        mission_id: MissionId,
        expected_version: u64,
        events: &[MissionEvent],
    ) -> Result<(), RepositoryError> {
        validate_batch(mission_id, expected_version, events)?;

        let mut tx = self.pool.begin().await?;

        let actual: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) FROM mission_events WHERE mission_id = $1",
        )
        .bind(mission_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

        if actual as u64 != expected_version {
            return Err(RepositoryError::Conflict {
                mission_id,
                expected: expected_version,
                actual: actual as u64,
            });
        }

        for event in events {
            let payload = serde_json::to_value(event)?;
            let inserted = sqlx::query(
                r#"
                INSERT INTO mission_events (mission_id, sequence, event_id, event_type, payload, occurred_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(mission_id.as_uuid())
            .bind(event.sequence as i64)
            .bind(event.id.0)
            .bind(event.event_type())
            .bind(payload)
            .bind(event.occurred_at)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                // A concurrent writer committed the same sequence first
                Err(err) if is_unique_violation(&err) => {
                    return Err(RepositoryError::Conflict {
                        mission_id,
                        expected: expected_version,
                        actual: event.sequence,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        tx.commit().await?;
        debug!(%mission_id, count = events.len(), "Appended mission events");
        Ok(())
    }

    async fn load(
        &self,
        mission_id: MissionId,
        from_sequence: u64,
    ) -> Result<Vec<MissionEvent>, RepositoryError> {
        let Some(from_sequence) = sequence_bound(from_sequence) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM mission_events
            WHERE mission_id = $1 AND sequence >= $2
            ORDER BY sequence ASC
            "#,
        )
        .bind(mission_id.as_uuid())
        .bind(from_sequence)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<MissionEvent, RepositoryError> {
                let payload: serde_json::Value = row.try_get("payload")?;
                Ok(serde_json::from_value(payload)?)
            })
            .collect()
    }

    async fn current_version(&self, mission_id: MissionId) -> Result<Option<u64>, RepositoryError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM mission_events WHERE mission_id = $1")
                .bind(mission_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(version.map(|v| v as u64))
    }
}

pub struct PostgresMissionRepository {
    pool: PgPool,
}

impl PostgresMissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MissionRepository for PostgresMissionRepository {
    async fn save(&self, projection: &MissionProjection) -> Result<(), RepositoryError> {
        let mission = &projection.mission;
        let payload = serde_json::to_value(projection)?;

        let mut tx = self.pool.begin().await?;

        // Never let a stale writer roll the cache back to an older version
        sqlx::query(
            r#"
            INSERT INTO mission_projections (mission_id, objective, status, version, projection, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (mission_id) DO UPDATE SET
                status = EXCLUDED.status,
                version = EXCLUDED.version,
                projection = EXCLUDED.projection,
                updated_at = EXCLUDED.updated_at
            WHERE mission_projections.version <= EXCLUDED.version
            "#,
        )
        .bind(mission.id.as_uuid())
        .bind(&mission.objective)
        .bind(mission.status.as_str())
        .bind(mission.version as i64)
        .bind(payload)
        .bind(mission.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save projection: {}", e)))?;

        for checkpoint in &projection.checkpoints {
            sqlx::query(
                r#"
                INSERT INTO mission_checkpoint_index (checkpoint_id, mission_id)
                VALUES ($1, $2)
                ON CONFLICT (checkpoint_id) DO NOTHING
                "#,
            )
            .bind(checkpoint.id.0)
            .bind(mission.id.as_uuid())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: MissionId) -> Result<Option<MissionProjection>, RepositoryError> {
        let row = sqlx::query("SELECT projection FROM mission_projections WHERE mission_id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let payload: serde_json::Value = row.try_get("projection")?;
                Ok(Some(serde_json::from_value(payload)?))
            }
            None => Ok(None),
        }
    }

    async fn find_by_checkpoint(
        &self,
        checkpoint_id: CheckpointId,
    ) -> Result<Option<MissionId>, RepositoryError> {
        let mission: Option<uuid::Uuid> = sqlx::query_scalar(
            "SELECT mission_id FROM mission_checkpoint_index WHERE checkpoint_id = $1",
        )
        .bind(checkpoint_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(mission.map(MissionId::from_uuid))
    }

    async fn list(&self) -> Result<Vec<MissionSummary>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT mission_id, objective, status, version, updated_at
            FROM mission_projections
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<MissionSummary, RepositoryError> {
                let status: String = row.try_get("status")?;
                let version: i64 = row.try_get("version")?;
                Ok(MissionSummary {
                    id: MissionId::from_uuid(row.try_get("mission_id")?),
                    objective: row.try_get("objective")?,
                    status: serde_json::from_value(serde_json::Value::String(status))?,
                    version: version as u64,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_bound_rejects_offsets_past_bigint() {
        assert_eq!(sequence_bound(0), Some(0));
        assert_eq!(sequence_bound(42), Some(42));
        assert_eq!(sequence_bound(i64::MAX as u64), Some(i64::MAX));
        assert_eq!(sequence_bound(i64::MAX as u64 + 1), None);
        assert_eq!(sequence_bound(u64::MAX), None);
    }
}
