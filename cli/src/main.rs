// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Reelforge CLI
//!
//! The `reelforge` binary runs the orchestrator daemon and exposes the
//! operator commands.
//!
//! ## Commands
//!
//! - `reelforge run` - Cycle scheduler, measurement workers and metrics exporter
//! - `reelforge cycle start|resume|cancel|status` - Cycle operations
//! - `reelforge learning sweep` - Deactivation, promotion and failure sweeps
//! - `reelforge cost estimate|allocation` - Model tiers and spend
//! - `reelforge approval list|approve|reject` - Human sign-off on parked plans
//! - `reelforge measurement status|resume` - Platform credential suspensions
//! - `reelforge cooldown check` - Posting availability per account
//! - `reelforge config show|validate` - Deployment configuration
//! - `reelforge db migrate` - Apply schema migrations

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod bootstrap;
mod commands;

use commands::{
    ApprovalCommand, ConfigCommand, CooldownCommand, CostCommand, CycleCommand, DbCommand, LearningCommand,
    MeasurementCommand, RunArgs,
};

/// Reelforge - adaptive content cycle orchestrator
#[derive(Parser)]
#[command(name = "reelforge")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "REELFORGE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "REELFORGE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator daemon
    #[command(name = "run")]
    Run(RunArgs),

    /// Cycle operations
    #[command(name = "cycle")]
    Cycle {
        #[command(subcommand)]
        command: CycleCommand,
    },

    /// Learning maintenance
    #[command(name = "learning")]
    Learning {
        #[command(subcommand)]
        command: LearningCommand,
    },

    /// Model tiers and spend
    #[command(name = "cost")]
    Cost {
        #[command(subcommand)]
        command: CostCommand,
    },

    /// Human plan approval
    #[command(name = "approval")]
    Approval {
        #[command(subcommand)]
        command: ApprovalCommand,
    },

    /// Measurement collection
    #[command(name = "measurement")]
    Measurement {
        #[command(subcommand)]
        command: MeasurementCommand,
    },

    /// Posting cooldowns
    #[command(name = "cooldown")]
    Cooldown {
        #[command(subcommand)]
        command: CooldownCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Database schema
    #[command(name = "db")]
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal in container deployments.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Run(args)) => commands::run::execute(args, cli.config).await,
        Some(Commands::Cycle { command }) => commands::cycle::handle_command(command, cli.config).await,
        Some(Commands::Learning { command }) => commands::learning::handle_command(command, cli.config).await,
        Some(Commands::Cost { command }) => commands::cost::handle_command(command, cli.config).await,
        Some(Commands::Approval { command }) => commands::approval::handle_command(command, cli.config).await,
        Some(Commands::Measurement { command }) => commands::measurement::handle_command(command, cli.config).await,
        Some(Commands::Cooldown { command }) => commands::cooldown::handle_command(command, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Db { command }) => commands::db::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
