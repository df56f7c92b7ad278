// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # missionctl
//!
//! Command line front end for the mission orchestration engine. The engine
//! runs embedded in the process; missions outlive a single invocation only
//! with the PostgreSQL persistence backend.
//!
//! ## Commands
//!
//! - `missionctl run --objective ..` - Submit a mission and drive it, prompting at checkpoints
//! - `missionctl status|events|advance|pause|resume|abort|rebuild|list` - Operate on missions
//! - `missionctl resolve <checkpoint> approve|reject|modify` - Answer a checkpoint
//! - `missionctl config show|validate|generate` - Configuration management
//! - `missionctl migrate` - Apply mission store migrations

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use mission_core::domain::engine_config::CONFIG_PATH_ENV;
use mission_orchestrator::commands::{self, ConfigCommand, MigrateCommand, MissionCommand};

/// Mission orchestrator - plan, run and supervise multi-agent missions
#[derive(Parser)]
#[command(name = "missionctl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = CONFIG_PATH_ENV,
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "MISSION_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Log format (text or json)
    #[arg(long, global = true, env = "MISSION_LOG_FORMAT", default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Mission(MissionCommand),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Apply mission store migrations
    #[command(name = "migrate")]
    Migrate {
        #[command(flatten)]
        command: MigrateCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is not an error
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format)?;

    match cli.command {
        Some(Commands::Mission(command)) => {
            commands::mission::handle_command(command, cli.config).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::Migrate { command }) => {
            commands::migrate::execute(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().init(),
        _ => builder.compact().init(),
    }

    Ok(())
}
