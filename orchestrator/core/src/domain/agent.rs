// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Agents are configured by name, so the identifier is the name itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Result<Self, AgentError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(AgentError::EmptyId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reasoning agent available for team assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    /// Capability tags matched against a step's required capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Name of the reasoning provider in the provider registry.
    pub provider: String,
    /// Strategy override; falls back to the step's strategy when unset.
    #[serde(default)]
    pub strategy: Option<String>,
    /// Fraction of recent calls that failed, in `[0, 1]`.
    #[serde(default)]
    pub recent_error_rate: f64,
    #[serde(default)]
    pub average_cost: f64,
}

impl AgentProfile {
    pub fn new(id: AgentId, provider: impl Into<String>) -> Self {
        Self {
            id,
            capabilities: Vec::new(),
            provider: provider.into(),
            strategy: None,
            recent_error_rate: 0.0,
            average_cost: 0.0,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stats(mut self, recent_error_rate: f64, average_cost: f64) -> Self {
        self.recent_error_rate = recent_error_rate;
        self.average_cost = average_cost;
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|own| own.eq_ignore_ascii_case(capability))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent id must not be empty")]
    EmptyId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_validation() {
        assert_eq!(AgentId::new("  researcher ").unwrap().as_str(), "researcher");
        assert_eq!(AgentId::new("   "), Err(AgentError::EmptyId));
    }

    #[test]
    fn test_capability_match_is_case_insensitive() {
        let agent = AgentProfile::new(AgentId::new("writer").unwrap(), "local")
            .with_capabilities(["Summarize", "draft"]);
        assert!(agent.has_capability("summarize"));
        assert!(!agent.has_capability("research"));
    }
}
