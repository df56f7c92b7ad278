// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use mission_core::domain::engine_config::{EngineConfigManifest, CONFIG_PATH_ENV};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./mission-config.yaml)
        #[arg(short, long, default_value = "./mission-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let manifest = EngineConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./mission-config.yaml");
        println!("  4. ~/.mission/config.yaml");
        println!("  5. /etc/mission/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", serde_yaml::to_string(&manifest)?);
        return Ok(());
    }

    let spec = &manifest.spec;
    println!("{} {}", "Current configuration:".bold(), manifest.metadata.name);
    println!();

    println!("{}", "Engine:".bold());
    println!("  Default budget: {:.2}", spec.engine.default_budget);
    println!("  Default strategy: {}", spec.engine.default_strategy);
    println!("  Branch timeout: {:?}", spec.engine.branch_timeout);
    println!("  Max steps: {}", spec.engine.max_steps);
    match spec.engine.seed {
        Some(seed) => println!("  Seed: {}", seed),
        None => println!("  Seed: {}", "(random per mission)".dimmed()),
    }
    println!();

    println!("{}", "Reasoning Providers:".bold());
    if spec.providers.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for provider in &spec.providers {
        let state = if provider.enabled { "" } else { " [disabled]" };
        println!(
            "  {} ({}){}",
            provider.name.bold(),
            provider.provider_type,
            state
        );
        println!("    Endpoint: {}", provider.endpoint);
        println!("    Model: {}", provider.model);
    }
    println!();

    println!("{}", "Agents:".bold());
    if spec.agents.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for agent in &spec.agents {
        println!(
            "  {} → {} [{}]",
            agent.id.as_str().bold(),
            agent.provider,
            agent.capabilities.join(", ")
        );
    }
    println!();

    println!("{}", "Resilience:".bold());
    println!(
        "  Retry: {} attempts, base delay {:?}",
        spec.resilience.retry.max_attempts, spec.resilience.retry.base_delay
    );
    println!(
        "  Circuit breaker: opens after {} failures, cooldown {:?}",
        spec.resilience.circuit_breaker.failure_threshold, spec.resilience.circuit_breaker.cooldown
    );
    println!();

    println!("{}", "Persistence:".bold());
    println!("  Backend: {:?}", spec.persistence.backend);

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let manifest = EngineConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    manifest
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

pub fn sample_config(with_examples: bool) -> &'static str {
    if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    }
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    std::fs::write(&output, sample_config(with_examples))
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_are_valid_manifests() {
        for with_examples in [false, true] {
            let manifest = EngineConfigManifest::from_yaml_str(sample_config(with_examples)).unwrap();
            manifest.validate().unwrap();
        }
    }

    #[tokio::test]
    async fn test_generate_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mission-config.yaml");
        generate(path.clone(), true).await.unwrap();

        let manifest = EngineConfigManifest::from_yaml_file(&path).unwrap();
        assert!(!manifest.spec.agents.is_empty());
    }
}
