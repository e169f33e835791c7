// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Posting cooldown commands
//!
//! Commands: check

use anyhow::{anyhow, bail, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use reelforge_core::application::CooldownStatus;
use reelforge_core::domain::measurement::Platform;

use crate::bootstrap::Services;

#[derive(Subcommand)]
pub enum CooldownCommand {
    /// Check whether an account may post. Without --account, every account
    /// that has posted before is listed.
    Check {
        /// Account ID
        #[arg(long, requires = "platform")]
        account: Option<String>,

        /// Platform (youtube, tiktok, instagram, x)
        #[arg(long, value_parser = parse_platform)]
        platform: Option<Platform>,
    },
}

pub async fn handle_command(command: CooldownCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let services = Services::connect(&config).await?;

    match command {
        CooldownCommand::Check {
            account: Some(account),
            platform: Some(platform),
        } => {
            let status = services.cooldown.check(&account, platform).await?;
            print_status(&status);
        }
        CooldownCommand::Check { account: Some(_), platform: None } => {
            bail!("--account requires --platform");
        }
        CooldownCommand::Check { account: None, platform } => {
            let accounts = services.cooldown.availability().await?;
            let accounts: Vec<_> = accounts
                .into_iter()
                .filter(|a| platform.is_none_or(|p| a.platform == p))
                .collect();
            if accounts.is_empty() {
                println!("{}", "No accounts have posted yet".dimmed());
                return Ok(());
            }
            println!("{}", format!("{:<24} {:<10} {}", "ACCOUNT", "PLATFORM", "AVAILABILITY").bold());
            for account in &accounts {
                let availability = if account.can_post {
                    "ready".green()
                } else {
                    format!("in {} min", account.remaining_minutes).yellow()
                };
                println!("{:<24} {:<10} {}", account.account_id, account.platform.as_str(), availability);
            }
        }
    }

    Ok(())
}

fn print_status(status: &CooldownStatus) {
    println!("{} on {}", status.account_id.bold(), status.platform);
    println!("  Cooldown: {}h", status.cooldown_hours);
    match status.last_posted_at {
        Some(last) => println!("  Last posted: {}", last.to_rfc3339()),
        None => println!("  Last posted: {}", "never".dimmed()),
    }
    if status.can_post {
        println!("  {}", "✓ Can post now".green());
    } else {
        let next = status
            .next_available_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        println!(
            "  {}",
            format!("✗ Next slot in {} min ({})", status.remaining_minutes, next).yellow()
        );
    }
}

pub(crate) fn parse_platform(raw: &str) -> Result<Platform> {
    Platform::parse(&raw.to_ascii_lowercase()).ok_or_else(|| {
        let known: Vec<&str> = Platform::ALL.iter().map(|p| p.as_str()).collect();
        anyhow!("unknown platform '{}' (expected one of: {})", raw, known.join(", "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_platform_is_case_insensitive() {
        assert_eq!(parse_platform("TikTok").unwrap(), Platform::Tiktok);
        assert_eq!(parse_platform("x").unwrap(), Platform::X);
        assert!(parse_platform("myspace").is_err());
    }
}
