// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Database schema commands
//!
//! Applies the migrations bundled with `reelforge-core` so the schema stays in
//! sync with the binary.
//!
//! # Usage
//!
//! ```bash
//! # Apply all pending migrations
//! reelforge db migrate
//!
//! # Preview migrations without applying
//! reelforge db migrate --dry-run
//! ```

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use reelforge_core::infrastructure::db::{Database, MIGRATOR};

#[derive(Subcommand)]
pub enum DbCommand {
    /// Apply pending schema migrations
    Migrate {
        /// Perform a dry run without applying changes
        #[arg(long)]
        dry_run: bool,
    },
}

pub async fn handle_command(command: DbCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        DbCommand::Migrate { dry_run } => migrate(config_path, dry_run).await,
    }
}

async fn migrate(config_path: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let url = config.database_url().context("No database URL configured")?;

    println!("Connecting to database...");
    let db = Database::connect(&url, 1)
        .await
        .context("Failed to connect to database")?;

    let applied = db.applied_migrations().await?;
    let pending: Vec<_> = MIGRATOR
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .collect();

    println!(
        "Migration status: {} applied, {} total available.",
        applied.len(),
        MIGRATOR.iter().count()
    );

    if pending.is_empty() {
        println!("{}", "✓ Database is up to date.".green());
        return Ok(());
    }

    if dry_run {
        println!("Pending migrations (dry run):");
        for migration in &pending {
            println!(" - {} {}", migration.version, migration.description);
        }
        println!("{}", "Skipping application due to --dry-run".yellow());
        return Ok(());
    }

    println!("Applying {} pending migrations...", pending.len());
    db.migrate().await.context("Failed to apply migrations")?;
    println!("{}", "✓ Database updated successfully.".green());

    Ok(())
}
