// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mission ledger
//!
//! Single write path for mission state. A commit folds the candidate events
//! into a scratch copy of the projection first, so an event the projection
//! rejects is never appended; then appends with the version the caller loaded
//! (optimistic concurrency), refreshes the materialized cache and publishes
//! the stored events on the bus.
//!
//! The store is the source of truth. A cache write that fails is logged and
//! repaired on the next load, which always tails the log past the cached
//! version.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::domain::error::MissionError;
use crate::domain::events::{MissionEvent, MissionEventKind};
use crate::domain::mission::MissionId;
use crate::domain::projection::MissionProjection;
use crate::domain::repository::{MissionEventStore, MissionRepository};
use crate::infrastructure::event_bus::MissionEventBus;

pub struct MissionLedger {
    store: Arc<dyn MissionEventStore>,
    cache: Arc<dyn MissionRepository>,
    bus: Arc<MissionEventBus>,
    locks: DashMap<MissionId, Arc<Mutex<()>>>,
}

impl MissionLedger {
    pub fn new(
        store: Arc<dyn MissionEventStore>,
        cache: Arc<dyn MissionRepository>,
        bus: Arc<MissionEventBus>,
    ) -> Self {
        Self {
            store,
            cache,
            bus,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn MissionEventStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn MissionRepository> {
        &self.cache
    }

    pub fn bus(&self) -> &Arc<MissionEventBus> {
        &self.bus
    }

    /// Serialises mutating operations on one mission within this process.
    pub async fn lock(&self, mission_id: MissionId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(mission_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Current projection: the cached snapshot brought up to date with the log.
    pub async fn load(&self, mission_id: MissionId) -> Result<MissionProjection, MissionError> {
        let Some(mut projection) = self.cache.find_by_id(mission_id).await? else {
            return self.rebuild(mission_id).await;
        };

        let tail = self.store.load(mission_id, projection.version() + 1).await?;
        if tail.is_empty() {
            return Ok(projection);
        }

        debug!(mission_id = %mission_id, events = tail.len(), "Catching up stale projection cache");
        for event in &tail {
            if let Err(e) = projection.apply(event) {
                warn!(mission_id = %mission_id, error = %e, "Cached projection diverged from log, rebuilding");
                return self.rebuild(mission_id).await;
            }
        }
        self.save_cache(&projection).await;
        Ok(projection)
    }

    /// Replay the complete log and overwrite the cache.
    pub async fn rebuild(&self, mission_id: MissionId) -> Result<MissionProjection, MissionError> {
        let events = self.store.load(mission_id, 1).await?;
        if events.is_empty() {
            return Err(MissionError::MissionNotFound(mission_id));
        }
        let projection = MissionProjection::replay(&events)?;
        self.save_cache(&projection).await;
        Ok(projection)
    }

    /// Start a new log with its `mission_submitted` event.
    pub async fn create(
        &self,
        mission_id: MissionId,
        submitted: MissionEventKind,
    ) -> Result<MissionProjection, MissionError> {
        let event = MissionEvent::new(mission_id, 1, submitted);
        let projection = MissionProjection::genesis(&event)?;
        self.store.append(mission_id, 0, std::slice::from_ref(&event)).await?;
        self.save_cache(&projection).await;
        self.bus.publish(std::slice::from_ref(&event));
        Ok(projection)
    }

    /// Append `kinds` as one atomic batch and advance `projection` past them.
    ///
    /// On any error `projection` is left untouched.
    pub async fn commit(
        &self,
        projection: &mut MissionProjection,
        kinds: Vec<MissionEventKind>,
    ) -> Result<Vec<MissionEvent>, MissionError> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }

        let mission_id = projection.mission.id;
        let mut next = projection.clone();
        let mut events = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let event = MissionEvent::new(mission_id, next.version() + 1, kind);
            next.apply(&event)?;
            events.push(event);
        }

        self.store
            .append(mission_id, projection.version(), &events)
            .await?;
        *projection = next;

        self.save_cache(projection).await;
        self.bus.publish(&events);
        Ok(events)
    }

    async fn save_cache(&self, projection: &MissionProjection) {
        if let Err(e) = self.cache.save(projection).await {
            warn!(
                mission_id = %projection.mission.id,
                version = projection.version(),
                error = %e,
                "Failed to refresh projection cache"
            );
        }
    }
}
