// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Database Migrate Command
//!
//! Applies the embedded schema migrations to the PostgreSQL mission store.
//!
//! ```bash
//! # Apply all pending migrations
//! missionctl migrate
//!
//! # Preview migrations without applying
//! missionctl migrate --dry-run
//! ```
//!
//! The database URL comes from `persistence.database_url` or
//! `MISSION_DATABASE_URL`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use mission_core::domain::engine_config::EngineConfigManifest;
use mission_core::infrastructure::db::Database;

#[derive(Args)]
pub struct MigrateCommand {
    /// Perform a dry run without applying changes
    #[arg(long)]
    dry_run: bool,
}

pub async fn execute(cmd: MigrateCommand, config_path: Option<PathBuf>) -> Result<()> {
    println!("{}", "Mission store migration".bold().green());

    let manifest = EngineConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    let database_url = manifest.spec.persistence.database_url.clone().context(
        "No database configured. Set persistence.database_url or MISSION_DATABASE_URL.",
    )?;

    println!("Connecting to database...");
    let database = Database::new(&database_url, 1)
        .await
        .context("Failed to connect to database")?;

    let (applied, total) = database.migration_status().await;
    println!(
        "Migration status: {} applied, {} total available.",
        applied, total
    );

    if applied >= total {
        println!("{}", "✓ Database is up to date.".green());
        return Ok(());
    }

    if cmd.dry_run {
        println!("Pending migrations found (Dry Run):");
        for migration in database.pending_migrations().await {
            println!(" - {}", migration);
        }
        println!("Skipping application due to --dry-run");
        return Ok(());
    }

    println!("Applying pending migrations...");
    let newly_applied = database.migrate().await?;
    println!(
        "{}",
        format!("✓ Database updated successfully ({} applied).", newly_applied).green()
    );
    Ok(())
}
