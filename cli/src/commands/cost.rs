// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cost commands
//!
//! Commands: allocation, estimate

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use reelforge_core::domain::cost::{month_key, TokenUsage};
use reelforge_core::domain::settings::keys;

use crate::bootstrap::Services;

/// Per-node usage assumed when no `--usage` is given.
const NOMINAL_USAGE: TokenUsage = TokenUsage {
    input_tokens: 8_000,
    output_tokens: 2_000,
};

#[derive(Subcommand)]
pub enum CostCommand {
    /// Show the model tier per node and this month's spend
    Allocation,

    /// Price a cycle from per-node token estimates
    Estimate {
        /// NODE=INPUT:OUTPUT token estimate (repeatable). Defaults to a
        /// nominal usage for every allocated node.
        #[arg(long = "usage", value_name = "NODE=IN:OUT", value_parser = parse_usage)]
        usage: Vec<(String, TokenUsage)>,
    },
}

pub async fn handle_command(command: CostCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let services = Services::connect(&config).await?;

    match command {
        CostCommand::Allocation => {
            let allocation = services.costs.allocation().await?;
            println!("{}", format!("{:<16} {:<14} {}", "NODE", "TIER", "RATIONALE").bold());
            for node in &allocation {
                println!("{:<16} {:<14} {}", node.node, node.tier.as_str(), node.rationale.dimmed());
            }
            println!();

            let now = Utc::now();
            let spend = services.costs.current_spend(now).await?;
            let limit = services
                .repos
                .settings
                .get_number(keys::MONTHLY_BUDGET_LIMIT_USD)
                .await
                .context("Failed to read monthly budget limit")?;
            let line = format!("Spend {}: ${:.2} of ${:.2}", month_key(now), spend, limit);
            if spend >= limit {
                println!("{}", line.red());
            } else {
                println!("{}", line);
            }
        }
        CostCommand::Estimate { usage } => {
            let usage = if usage.is_empty() {
                services
                    .costs
                    .allocation()
                    .await?
                    .into_iter()
                    .map(|node| (node.node, NOMINAL_USAGE))
                    .collect()
            } else {
                usage
            };

            let estimate = services.costs.estimate(&usage).await?;
            println!("{}", format!("{:<16} {:<14} {:>10}", "NODE", "TIER", "COST").bold());
            for line in &estimate.breakdown {
                println!("{:<16} {:<14} {:>10}", line.node, line.tier.as_str(), format!("${:.4}", line.cost_usd));
            }
            println!("{}", format!("{:<31} {:>10}", "Total", format!("${:.4}", estimate.total_cost_usd)).bold());
        }
    }

    Ok(())
}

/// Parses `NODE=INPUT:OUTPUT`.
fn parse_usage(raw: &str) -> Result<(String, TokenUsage)> {
    let (node, tokens) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NODE=INPUT:OUTPUT, got '{}'", raw))?;
    let (input, output) = tokens
        .split_once(':')
        .ok_or_else(|| anyhow!("expected INPUT:OUTPUT token counts, got '{}'", tokens))?;
    let node = node.trim();
    if node.is_empty() {
        return Err(anyhow!("node name is empty"));
    }
    let input = input.trim().parse::<u64>().context("invalid input token count")?;
    let output = output.trim().parse::<u64>().context("invalid output token count")?;
    Ok((node.to_string(), TokenUsage::new(input, output)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_usage() {
        let (node, usage) = parse_usage("plan_content=12000:3000").unwrap();
        assert_eq!(node, "plan_content");
        assert_eq!(usage, TokenUsage::new(12_000, 3_000));
    }

    #[test]
    fn test_parse_usage_rejects_malformed() {
        assert!(parse_usage("plan_content").is_err());
        assert!(parse_usage("plan_content=12000").is_err());
        assert!(parse_usage("=1:2").is_err());
        assert!(parse_usage("reflect=a:2").is_err());
    }
}
