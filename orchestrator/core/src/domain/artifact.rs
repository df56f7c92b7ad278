// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mission artifacts: immutable deliverables produced during execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::mission::MissionId;
use crate::domain::plan::StepId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactType {
    Document,
    Table,
    CitationBundle,
    /// Final deliverable composed from every step output.
    Synthesis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionArtifact {
    pub id: ArtifactId,
    pub mission_id: MissionId,
    /// Producing step; `None` for the mission synthesis.
    pub step_id: Option<StepId>,
    pub artifact_type: ArtifactType,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MissionArtifact {
    pub fn new(
        mission_id: MissionId,
        step_id: Option<StepId>,
        artifact_type: ArtifactType,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: ArtifactId::new(),
            mission_id,
            step_id,
            artifact_type,
            title: title.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}
