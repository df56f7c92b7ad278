// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Checkpoints: durable requests for human judgment.
//!
//! A checkpoint is created `pending` and resolved exactly once. While one is
//! pending the owning mission cannot advance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::mission::{MissionId, MissionStatus};
use crate::domain::plan::{GateTiming, StepId};

/// Options offered on every `risk-decision` checkpoint.
pub const RISK_OPTION_RETRY: &str = "retry";
pub const RISK_OPTION_SKIP: &str = "skip";
pub const RISK_OPTION_ABORT: &str = "abort";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointId(pub Uuid);

impl CheckpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CheckpointId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointType {
    PlanApproval,
    ToolUseApproval,
    SubAgentDelegationApproval,
    RiskDecision,
}

impl fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PlanApproval => "plan-approval",
            Self::ToolUseApproval => "tool-use-approval",
            Self::SubAgentDelegationApproval => "sub-agent-delegation-approval",
            Self::RiskDecision => "risk-decision",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Approved,
    Rejected,
    Modified,
}

impl CheckpointStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointAction {
    Approve,
    Reject,
    Modify,
}

impl CheckpointAction {
    pub fn resulting_status(&self) -> CheckpointStatus {
        match self {
            Self::Approve => CheckpointStatus::Approved,
            Self::Reject => CheckpointStatus::Rejected,
            Self::Modify => CheckpointStatus::Modified,
        }
    }
}

impl FromStr for CheckpointAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Self::Approve),
            "reject" | "rejected" => Ok(Self::Reject),
            "modify" | "modified" => Ok(Self::Modify),
            other => Err(format!("unknown checkpoint action '{}'", other)),
        }
    }
}

/// A decision-maker's answer to a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointResponse {
    pub action: CheckpointAction,
    #[serde(default)]
    pub option: Option<String>,
    #[serde(default)]
    pub patch: Option<serde_json::Value>,
    #[serde(default)]
    pub responder: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl CheckpointResponse {
    pub fn approve() -> Self {
        Self::with_action(CheckpointAction::Approve)
    }

    pub fn reject() -> Self {
        Self::with_action(CheckpointAction::Reject)
    }

    pub fn modify(patch: serde_json::Value) -> Self {
        Self {
            patch: Some(patch),
            ..Self::with_action(CheckpointAction::Modify)
        }
    }

    pub fn choose(option: impl Into<String>) -> Self {
        Self {
            option: Some(option.into()),
            ..Self::with_action(CheckpointAction::Approve)
        }
    }

    pub fn with_responder(mut self, responder: impl Into<String>) -> Self {
        self.responder = Some(responder.into());
        self
    }

    fn with_action(action: CheckpointAction) -> Self {
        Self {
            action,
            option: None,
            patch: None,
            responder: None,
            note: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub mission_id: MissionId,
    #[serde(rename = "type")]
    pub checkpoint_type: CheckpointType,
    pub prompt: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
    /// Step the checkpoint guards, if any. Plan-level checkpoints have none.
    pub step_id: Option<StepId>,
    pub gate: Option<GateTiming>,
    /// Mission status restored on approval or modification.
    pub resume_to: MissionStatus,
    pub status: CheckpointStatus,
    pub response: Option<CheckpointResponse>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn is_pending(&self) -> bool {
        self.status == CheckpointStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_serializes_kebab_case() {
        let json = serde_json::to_string(&CheckpointType::SubAgentDelegationApproval).unwrap();
        assert_eq!(json, "\"sub-agent-delegation-approval\"");
        assert_eq!(CheckpointType::PlanApproval.to_string(), "plan-approval");
    }

    #[test]
    fn test_action_parsing_and_status() {
        assert_eq!("Reject".parse::<CheckpointAction>().unwrap(), CheckpointAction::Reject);
        assert_eq!(
            CheckpointAction::Modify.resulting_status(),
            CheckpointStatus::Modified
        );
        assert!("defer".parse::<CheckpointAction>().is_err());
    }
}
