// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Embedded engine construction
//!
//! Builds the mission engine in-process from the discovered configuration:
//! resilience layer, provider registry, stores for the configured backend.
//! With the default `in_memory` backend a mission only lives as long as the
//! process, so cross-invocation commands need `persistence.backend: postgres`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use mission_core::{
    application::{create_mission_stores, storage_backend, MissionEngine, MissionStores},
    domain::{engine_config::EngineConfigManifest, repository::StorageBackend},
    infrastructure::{llm::ProviderRegistry, resilience::ResilienceLayer},
};

pub struct EmbeddedEngine {
    pub engine: MissionEngine,
    pub manifest: EngineConfigManifest,
    pub persistent: bool,
}

impl EmbeddedEngine {
    pub async fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let manifest = EngineConfigManifest::load_or_default(config_path)
            .context("Failed to load configuration")?;
        manifest
            .validate()
            .context("Configuration validation failed")?;

        let backend = storage_backend(&manifest.spec.persistence)?;
        let persistent = !matches!(backend, StorageBackend::InMemory);
        let stores = create_mission_stores(&backend).await?;
        Self::with_stores(manifest, stores, persistent)
    }

    pub fn with_stores(
        manifest: EngineConfigManifest,
        stores: MissionStores,
        persistent: bool,
    ) -> Result<Self> {
        let resilience = Arc::new(ResilienceLayer::from_settings(&manifest.spec.resilience));
        let registry = ProviderRegistry::from_config(&manifest.spec, resilience)
            .context("Failed to initialize reasoning providers")?;
        info!(
            providers = ?registry.names(),
            agents = manifest.spec.agents.len(),
            persistent,
            "Embedded mission engine ready"
        );

        let engine = MissionEngine::new(
            &manifest.spec,
            Arc::new(registry),
            stores.events,
            stores.cache,
        );
        Ok(Self {
            engine,
            manifest,
            persistent,
        })
    }

    /// Warn when a command addresses a mission this process cannot have seen.
    pub fn warn_if_ephemeral(&self) {
        if !self.persistent {
            warn!(
                "persistence.backend is in_memory; only missions started by this process are visible"
            );
        }
    }
}
