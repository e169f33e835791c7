// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Learning commands
//!
//! Commands: list, sweep

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use crate::bootstrap::Services;

#[derive(Subcommand)]
pub enum LearningCommand {
    /// List active learnings, highest confidence first
    List {
        /// Only learnings owned by this agent role
        #[arg(long)]
        role: Option<String>,
    },

    /// Run the deactivation, promotion and failure sweeps
    Sweep {
        /// Restrict the sweep to one agent role
        #[arg(long)]
        role: Option<String>,
    },
}

pub async fn handle_command(command: LearningCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let services = Services::connect(&config).await?;

    match command {
        LearningCommand::List { role } => {
            let learnings = services.learning.active_learnings(role.as_deref()).await?;
            if learnings.is_empty() {
                println!("{}", "No active learnings".dimmed());
                return Ok(());
            }
            for learning in &learnings {
                println!(
                    "{} {:.2} [{}/{}] {}",
                    learning.id.to_string().dimmed(),
                    learning.confidence.value(),
                    learning.agent_role,
                    learning.category,
                    learning.content
                );
            }
        }
        LearningCommand::Sweep { role } => {
            let report = services.learning.sweep(role.as_deref()).await?;

            println!("{}", "Learning sweep".bold());
            println!("  Deactivated: {}", report.deactivated.len());
            for id in &report.deactivated {
                println!("    - {}", id.to_string().dimmed());
            }
            println!("  Promoted: {}", report.promoted.len());
            for promoted in &report.promoted {
                println!(
                    "    - {} → {} ({})",
                    promoted.learning_id,
                    promoted.global_learning_id,
                    promoted.global_category.cyan()
                );
            }
            if report.failing.is_empty() {
                println!("  Failing: 0");
            } else {
                println!("  {}", format!("Failing: {}", report.failing.len()).yellow());
                for id in &report.failing {
                    println!("    - {}", id);
                }
            }
        }
    }

    Ok(())
}
