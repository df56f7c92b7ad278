// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the event store and projection cache for the configured storage
//! backend. The domain only knows the traits; this is where a concrete
//! backend is chosen.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::domain::engine_config::{PersistenceBackend, PersistenceSettings};
use crate::domain::repository::{MissionEventStore, MissionRepository, PostgresConfig, StorageBackend};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::postgres_mission::{
    PostgresMissionEventStore, PostgresMissionRepository,
};
use crate::infrastructure::repositories::{InMemoryMissionEventStore, InMemoryMissionRepository};

/// The two persistence halves a `MissionEngine` is built from.
#[derive(Clone)]
pub struct MissionStores {
    pub events: Arc<dyn MissionEventStore>,
    pub cache: Arc<dyn MissionRepository>,
}

impl MissionStores {
    pub fn in_memory() -> Self {
        Self {
            events: Arc::new(InMemoryMissionEventStore::new()),
            cache: Arc::new(InMemoryMissionRepository::new()),
        }
    }
}

/// Resolve the `persistence` config section into a storage backend.
pub fn storage_backend(settings: &PersistenceSettings) -> Result<StorageBackend> {
    match settings.backend {
        PersistenceBackend::InMemory => Ok(StorageBackend::InMemory),
        PersistenceBackend::Postgres => {
            let Some(url) = settings.database_url.clone() else {
                bail!("persistence.backend is postgres but persistence.database_url is not set");
            };
            Ok(StorageBackend::PostgreSQL(PostgresConfig {
                connection_string: url,
                max_connections: settings.max_connections,
            }))
        }
    }
}

/// Creates the mission stores for `backend`, applying migrations for PostgreSQL.
pub async fn create_mission_stores(backend: &StorageBackend) -> Result<MissionStores> {
    match backend {
        StorageBackend::InMemory => Ok(MissionStores::in_memory()),
        StorageBackend::PostgreSQL(config) => {
            let database = Database::new(&config.connection_string, config.max_connections)
                .await
                .context("Failed to open mission store")?;
            let applied = database.migrate().await?;
            info!(applied, "Mission store schema is up to date");

            let pool = database.get_pool().clone();
            Ok(MissionStores {
                events: Arc::new(PostgresMissionEventStore::new(pool.clone())),
                cache: Arc::new(PostgresMissionRepository::new(pool)),
            })
        }
    }
}
