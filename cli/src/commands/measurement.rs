// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Measurement commands
//!
//! Commands: status, resume
//!
//! A platform whose credentials were rejected stays suspended in the store
//! until it is resumed here; the running workers pick the change up on their
//! next poll.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use reelforge_core::domain::measurement::Platform;

use super::cooldown::parse_platform;
use crate::bootstrap::Services;

#[derive(Subcommand)]
pub enum MeasurementCommand {
    /// Show suspended platforms
    Status,

    /// Resume collection after fixing a platform's credentials
    Resume {
        /// Platform (youtube, tiktok, instagram, x)
        #[arg(value_parser = parse_platform)]
        platform: Platform,
    },
}

pub async fn handle_command(command: MeasurementCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let services = Services::connect(&config).await?;
    let measurements = &services.repos.measurements;

    match command {
        MeasurementCommand::Status => {
            let suspended = measurements.list_suspensions().await?;
            for platform in Platform::ALL {
                match suspended.iter().find(|s| s.platform == platform) {
                    Some(suspension) => println!(
                        "{:<10} {} since {} ({})",
                        platform.as_str(),
                        "suspended".red(),
                        suspension.suspended_at.format("%Y-%m-%d %H:%M:%S"),
                        suspension.reason
                    ),
                    None => println!("{:<10} {}", platform.as_str(), "collecting".green()),
                }
            }
        }
        MeasurementCommand::Resume { platform } => {
            if measurements.resume_platform(platform).await? {
                println!("{} {} resumed", "✓".green(), platform);
            } else {
                println!("{}", format!("{platform} was not suspended").dimmed());
            }
        }
    }

    Ok(())
}
