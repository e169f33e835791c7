// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cycle commands
//!
//! Commands: start, resume, cancel, status

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use reelforge_core::application::CycleReport;
use reelforge_core::domain::cycle::{Cycle, CycleId, CycleStatus};
use reelforge_core::infrastructure::db::CYCLE_ENGINE_LOCK_KEY;

use crate::bootstrap::Services;

#[derive(Subcommand)]
pub enum CycleCommand {
    /// Run one full cycle now
    Start,

    /// Resume a budget-deferred cycle
    Resume {
        /// Cycle ID
        id: i64,
    },

    /// Cancel a non-terminal cycle
    Cancel {
        /// Cycle ID
        id: i64,

        /// Reason recorded on the cycle
        #[arg(long, default_value = "cancelled by operator")]
        reason: String,
    },

    /// Show one cycle, or the most recent ones
    Status {
        /// Cycle ID
        id: Option<i64>,

        /// Number of recent cycles to list
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

pub async fn handle_command(command: CycleCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let services = Services::connect(&config).await?;

    match command {
        CycleCommand::Start => {
            let lease = acquire_lease(&services).await?;
            let engine = services.cycle_engine(&config)?;
            let result = engine.run_cycle().await;
            lease.release().await?;
            print_report(&result.context("Cycle failed")?);
        }
        CycleCommand::Resume { id } => {
            let lease = acquire_lease(&services).await?;
            let engine = services.cycle_engine(&config)?;
            let result = engine.resume_cycle(CycleId(id)).await;
            lease.release().await?;
            print_report(&result.with_context(|| format!("Failed to resume cycle {}", id))?);
        }
        CycleCommand::Cancel { id, reason } => {
            let cycle = services
                .repos
                .cycles
                .find_by_id(CycleId(id))
                .await?
                .with_context(|| format!("Cycle {} not found", id))?;
            if cycle.status.is_terminal() {
                bail!("Cycle {} is already {}", id, cycle.status);
            }
            let engine = services.cycle_engine(&config)?;
            let cycle = engine.cancel_cycle(CycleId(id), &reason).await?;
            println!("{}", format!("✓ Cycle {} cancelled", cycle.id).green());
        }
        CycleCommand::Status { id: Some(id), .. } => {
            let cycle = services
                .repos
                .cycles
                .find_by_id(CycleId(id))
                .await?
                .with_context(|| format!("Cycle {} not found", id))?;
            print_cycle_detail(&cycle);
        }
        CycleCommand::Status { id: None, limit } => {
            let cycles = services.repos.cycles.list_recent(limit).await?;
            if cycles.is_empty() {
                println!("{}", "No cycles yet".dimmed());
                return Ok(());
            }
            println!(
                "{}",
                format!("{:<8} {:<6} {:<10} {:<10} {}", "ID", "NO.", "STATUS", "STAGE", "STARTED").bold()
            );
            for cycle in &cycles {
                println!(
                    "{:<8} {:<6} {:<10} {:<10} {}",
                    cycle.id,
                    cycle.cycle_number,
                    colorize_status(cycle.status),
                    cycle.current_stage.map(|s| s.as_str()).unwrap_or("-"),
                    cycle.started_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }

    Ok(())
}

/// One-shot start/resume share the daemon's advisory lock.
async fn acquire_lease(services: &Services) -> Result<reelforge_core::infrastructure::db::SingletonLease> {
    let db = services.db.as_ref().context("A database connection is required")?;
    match db.try_acquire_lease(CYCLE_ENGINE_LOCK_KEY).await? {
        Some(lease) => Ok(lease),
        None => bail!("A reelforge daemon is driving cycles on this database; stop it or wait for the next tick"),
    }
}

fn print_report(report: &CycleReport) {
    println!(
        "Cycle {} (#{}) finished: {}",
        report.cycle_id,
        report.cycle_number,
        colorize_status(report.status)
    );
    let stages: Vec<&str> = report.stages_run.iter().map(|s| s.as_str()).collect();
    println!("  Stages: {}", stages.join(" → "));
    println!("  Plan revisions: {}", report.revisions);
    if report.force_approved {
        println!("  {}", "Plan was force-approved after reaching the revision limit".yellow());
    }
    println!("  Cost: ${:.4}", report.cost_usd);
    if let Some(sweep) = &report.sweep {
        println!(
            "  Learnings: {} deactivated, {} promoted, {} failing",
            sweep.deactivated.len(),
            sweep.promoted.len(),
            sweep.failing.len()
        );
    }
}

fn print_cycle_detail(cycle: &Cycle) {
    println!("{} {}", "Cycle".bold(), cycle.id);
    println!("  Number: {}", cycle.cycle_number);
    println!("  Status: {}", colorize_status(cycle.status));
    if let Some(stage) = cycle.current_stage {
        println!("  Stage: {}", stage);
    }
    println!("  Started: {}", cycle.started_at.to_rfc3339());
    if let Some(ended) = cycle.ended_at {
        println!("  Ended: {}", ended.to_rfc3339());
    }
    if let Some(reason) = &cycle.failure_reason {
        println!("  Failure: {}", reason.red());
    }
    if cycle.summary.as_object().is_some_and(|o| !o.is_empty()) {
        println!("  Summary:");
        let pretty = serde_json::to_string_pretty(&cycle.summary).unwrap_or_default();
        for line in pretty.lines() {
            println!("    {}", line);
        }
    }
}

fn colorize_status(status: CycleStatus) -> colored::ColoredString {
    let label = status.as_str();
    match status {
        CycleStatus::Completed => label.green(),
        CycleStatus::Failed => label.red(),
        CycleStatus::Deferred => label.yellow(),
        CycleStatus::Planning | CycleStatus::Producing | CycleStatus::Measuring => label.cyan(),
    }
}
