// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype that is
//! injected into the PostgreSQL mission store implementations. Only needed
//! when `persistence.backend: postgres` is configured.

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(connection_string)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations; returns how many were applied.
    pub async fn migrate(&self) -> Result<usize> {
        let applied = self.applied_migrations().await;
        MIGRATOR
            .run(&self.pool)
            .await
            .context("Failed to apply migrations")?;
        let total = MIGRATOR.iter().count();
        let newly_applied = total.saturating_sub(applied);
        if newly_applied > 0 {
            info!("Applied {} database migration(s)", newly_applied);
        }
        Ok(newly_applied)
    }

    /// `(applied, available)` migration counts.
    pub async fn migration_status(&self) -> (usize, usize) {
        (self.applied_migrations().await, MIGRATOR.iter().count())
    }

    /// Descriptions of migrations not yet applied.
    pub async fn pending_migrations(&self) -> Vec<String> {
        let applied = self.applied_migrations().await;
        MIGRATOR
            .iter()
            .skip(applied)
            .map(|migration| format!("{} {}", migration.version, migration.description))
            .collect()
    }

    async fn applied_migrations(&self) -> usize {
        // The bookkeeping table does not exist before the first run
        sqlx::query("SELECT version FROM _sqlx_migrations")
            .fetch_all(&self.pool)
            .await
            .map(|rows| rows.len())
            .unwrap_or(0)
    }
}
