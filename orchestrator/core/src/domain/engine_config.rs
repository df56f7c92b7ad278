// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Engine Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing:
// - Engine limits and defaults (objective bound, budget, seed, timeouts)
// - Resilience settings (retry backoff, circuit breaker cool-downs)
// - Reasoning providers (BYOLLM) and the agent roster built on them
// - Reasoning strategy tuning
// - Persistence backend and observability

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::agent::AgentProfile;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "EngineConfig";
pub const CONFIG_PATH_ENV: &str = "MISSION_CONFIG_PATH";

/// Top-level engine configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfigManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "EngineConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Engine configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub resilience: ResilienceSettings,

    #[serde(default)]
    pub providers: Vec<ProviderSettings>,

    #[serde(default)]
    pub agents: Vec<AgentProfile>,

    #[serde(default)]
    pub strategies: StrategySettings,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub observability: ObservabilitySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Upper bound on objective length, in characters
    #[serde(default = "default_max_objective_chars")]
    pub max_objective_chars: usize,

    #[serde(default = "default_budget")]
    pub default_budget: f64,

    /// Fixed root seed for strategy runs; random per mission when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default = "default_branch_timeout", with = "humantime_serde")]
    pub branch_timeout: Duration,

    #[serde(default = "default_strategy")]
    pub default_strategy: String,

    /// Strategy the plan generator drives the planner provider with
    #[serde(default = "default_strategy")]
    pub planning_strategy: String,

    /// Provider used for plan generation; first configured provider if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner_provider: Option<String>,

    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default = "default_max_step_attempts")]
    pub max_step_attempts: u32,

    /// Broadcast buffer of the event stream
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_objective_chars: default_max_objective_chars(),
            default_budget: default_budget(),
            seed: None,
            branch_timeout: default_branch_timeout(),
            default_strategy: default_strategy(),
            planning_strategy: default_strategy(),
            planner_provider: None,
            max_steps: default_max_steps(),
            max_step_attempts: default_max_step_attempts(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceSettings {
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Ceiling on the sum of all backoff sleeps for one call
    #[serde(default = "default_max_total_wait", with = "humantime_serde")]
    pub max_total_wait: Duration,

    /// Symmetric jitter as a fraction of the computed delay
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            max_total_wait: default_max_total_wait(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,

    /// Growth factor applied each time a half-open probe fails
    #[serde(default = "default_multiplier")]
    pub cooldown_multiplier: f64,

    #[serde(default = "default_max_cooldown", with = "humantime_serde")]
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown: default_cooldown(),
            cooldown_multiplier: default_multiplier(),
            max_cooldown: default_max_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Unique provider name referenced by agents
    pub name: String,

    /// Provider type: "openai", "openai-compatible", "ollama"
    #[serde(rename = "type")]
    pub provider_type: String,

    pub endpoint: String,

    /// API key (supports "env:VAR_NAME" for environment variables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    pub model: String,

    /// Cost per 1,000 tokens (0.0 for local models)
    #[serde(default)]
    pub cost_per_1k_tokens: f64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategySettings {
    #[serde(default)]
    pub tree_search: TreeSearchSettings,

    #[serde(default)]
    pub mixture_of_experts: MixtureOfExpertsSettings,

    #[serde(default)]
    pub self_consistency: SelfConsistencySettings,

    #[serde(default)]
    pub constitutional: ConstitutionalSettings,

    #[serde(default)]
    pub debate: DebateSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSearchSettings {
    #[serde(default = "default_branching")]
    pub branching: usize,
    #[serde(default = "default_depth")]
    pub depth: usize,
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: f64,
    #[serde(default = "default_beam")]
    pub beam: usize,
}

impl Default for TreeSearchSettings {
    fn default() -> Self {
        Self {
            branching: default_branching(),
            depth: default_depth(),
            prune_threshold: default_prune_threshold(),
            beam: default_beam(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertRoute {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Registered strategy the route delegates to
    pub expert: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureOfExpertsSettings {
    /// Experts run concurrently when more than one has positive affinity
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_routes")]
    pub routes: Vec<ExpertRoute>,
}

impl Default for MixtureOfExpertsSettings {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            routes: default_routes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfConsistencySettings {
    #[serde(default = "default_samples")]
    pub samples: usize,
}

impl Default for SelfConsistencySettings {
    fn default() -> Self {
        Self {
            samples: default_samples(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionRule {
    pub id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionalSettings {
    #[serde(default = "default_max_revisions")]
    pub max_revisions: usize,
    #[serde(default = "default_rules")]
    pub rules: Vec<ConstitutionRule>,
}

impl Default for ConstitutionalSettings {
    fn default() -> Self {
        Self {
            max_revisions: default_max_revisions(),
            rules: default_rules(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSettings {
    #[serde(default = "default_rounds")]
    pub rounds: usize,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceBackend {
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    #[serde(default = "default_backend")]
    pub backend: PersistenceBackend,

    /// Connection string for the postgres backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for EngineConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "mission-engine".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: EngineConfig::default(),
        }
    }
}

impl EngineConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Candidate configuration paths, in precedence order after `--config`
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./mission-config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".mission").join("config.yaml"));
        }
        #[cfg(unix)]
        paths.push(PathBuf::from("/etc/mission/config.yaml"));
        #[cfg(windows)]
        paths.push(PathBuf::from("C:\\ProgramData\\Mission\\config.yaml"));
        paths
    }

    /// Discover configuration file using precedence order
    /// 1. MISSION_CONFIG_PATH environment variable
    /// 2. ./mission-config.yaml (working directory)
    /// 3. ~/.mission/config.yaml (user home)
    /// 4. /etc/mission/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|path| path.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override source is injectable so tests do not touch process env.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MISSION_DATABASE_URL") {
            tracing::info!("Environment override: MISSION_DATABASE_URL (postgres backend)");
            self.spec.persistence.backend = PersistenceBackend::Postgres;
            self.spec.persistence.database_url = Some(url);
        }

        if let Some(level) = lookup("MISSION_LOG_LEVEL") {
            tracing::info!("Environment override: MISSION_LOG_LEVEL={}", level);
            self.spec.observability.log_level = level;
        }

        if let Some(seed) = lookup("MISSION_SEED") {
            match seed.parse::<u64>() {
                Ok(seed) => {
                    tracing::info!("Environment override: MISSION_SEED={}", seed);
                    self.spec.engine.seed = Some(seed);
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for MISSION_SEED: '{}'. Expected an unsigned integer. Ignoring.",
                        seed
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        let engine = &spec.engine;
        if engine.max_objective_chars == 0 {
            anyhow::bail!("engine.max_objective_chars must be positive");
        }
        if !(engine.default_budget.is_finite() && engine.default_budget > 0.0) {
            anyhow::bail!("engine.default_budget must be a positive number");
        }
        if engine.max_steps == 0 || engine.max_step_attempts == 0 {
            anyhow::bail!("engine.max_steps and engine.max_step_attempts must be positive");
        }

        let retry = &spec.resilience.retry;
        if retry.max_attempts == 0 {
            anyhow::bail!("resilience.retry.max_attempts must be at least 1");
        }
        if retry.multiplier < 1.0 || !(0.0..=1.0).contains(&retry.jitter) {
            anyhow::bail!("resilience.retry requires multiplier >= 1.0 and jitter in [0, 1]");
        }
        let breaker = &spec.resilience.circuit_breaker;
        if breaker.failure_threshold == 0 || breaker.cooldown_multiplier < 1.0 {
            anyhow::bail!(
                "resilience.circuit_breaker requires failure_threshold >= 1 and cooldown_multiplier >= 1.0"
            );
        }

        let mut provider_names = HashSet::new();
        for provider in &spec.providers {
            if provider.name.is_empty() {
                anyhow::bail!("Provider name cannot be empty");
            }
            if !provider_names.insert(provider.name.as_str()) {
                anyhow::bail!("Duplicate provider name: {}", provider.name);
            }
            if provider.endpoint.is_empty() {
                anyhow::bail!("Provider endpoint cannot be empty for: {}", provider.name);
            }
            if provider.model.is_empty() {
                anyhow::bail!("Provider model cannot be empty for: {}", provider.name);
            }
            if provider.cost_per_1k_tokens < 0.0 {
                anyhow::bail!("Provider cost cannot be negative for: {}", provider.name);
            }
        }

        let mut agent_names = HashSet::new();
        for agent in &spec.agents {
            if agent.id.as_str().is_empty() {
                anyhow::bail!("Agent id cannot be empty");
            }
            if !agent_names.insert(agent.id.as_str()) {
                anyhow::bail!("Duplicate agent id: {}", agent.id);
            }
            if !provider_names.contains(agent.provider.as_str()) {
                anyhow::bail!(
                    "Agent '{}' references unknown provider '{}'",
                    agent.id,
                    agent.provider
                );
            }
            if !(0.0..=1.0).contains(&agent.recent_error_rate) {
                anyhow::bail!("Agent '{}' error rate must be within [0, 1]", agent.id);
            }
        }

        if let Some(planner) = &engine.planner_provider {
            if !provider_names.contains(planner.as_str()) {
                anyhow::bail!("Planner provider '{}' not found in providers", planner);
            }
        }

        if spec.persistence.backend == PersistenceBackend::Postgres
            && spec.persistence.database_url.is_none()
        {
            anyhow::bail!("persistence.database_url is required for the postgres backend");
        }

        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_objective_chars() -> usize {
    4000
}

fn default_budget() -> f64 {
    5.0
}

fn default_branch_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_strategy() -> String {
    crate::domain::plan::DEFAULT_STRATEGY.to_string()
}

fn default_max_steps() -> usize {
    8
}

fn default_max_step_attempts() -> u32 {
    crate::domain::plan::DEFAULT_MAX_ATTEMPTS
}

fn default_event_buffer() -> usize {
    1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_total_wait() -> Duration {
    Duration::from_secs(20)
}

fn default_jitter() -> f64 {
    0.2
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_max_cooldown() -> Duration {
    Duration::from_secs(600)
}

fn default_branching() -> usize {
    3
}

fn default_depth() -> usize {
    2
}

fn default_prune_threshold() -> f64 {
    0.5
}

fn default_beam() -> usize {
    2
}

fn default_weight() -> f64 {
    1.0
}

fn default_max_parallel() -> usize {
    1
}

fn default_routes() -> Vec<ExpertRoute> {
    let route = |name: &str, keywords: &[&str], expert: &str| ExpertRoute {
        name: name.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        expert: expert.to_string(),
        weight: 1.0,
    };
    vec![
        route("generalist", &[], "direct"),
        route(
            "analyst",
            &["calculate", "estimate", "compute", "numbers", "math", "quantify"],
            "self_consistency",
        ),
        route(
            "planner",
            &["plan", "design", "explore", "options", "strategy", "roadmap"],
            "tree_search",
        ),
        route(
            "reviewer",
            &["policy", "compliance", "safety", "legal", "review", "risk"],
            "constitutional",
        ),
        route(
            "arbiter",
            &["compare", "versus", "tradeoff", "evaluate", "debate", "choose"],
            "debate",
        ),
    ]
}

fn default_samples() -> usize {
    5
}

fn default_max_revisions() -> usize {
    2
}

fn default_rules() -> Vec<ConstitutionRule> {
    let rule = |id: &str, description: &str| ConstitutionRule {
        id: id.to_string(),
        description: description.to_string(),
    };
    vec![
        rule("grounded", "Claims must be supported by the provided material or marked as assumptions."),
        rule("on-task", "The answer must address the stated step and nothing else."),
        rule("no-fabrication", "Do not invent sources, figures, quotations or citations."),
        rule("harmless", "Do not include instructions that could cause harm."),
    ]
}

fn default_rounds() -> usize {
    2
}

fn default_backend() -> PersistenceBackend {
    PersistenceBackend::InMemory
}

fn default_max_connections() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}
