// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use reelforge_core::domain::cycle::CycleStage;
use reelforge_core::infrastructure::config::{OrchestratorConfigManifest, CONFIG_PATH_ENV};

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

    /// Write the default manifest to a file
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./reelforge-config.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output } => generate(output),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config =
        OrchestratorConfigManifest::load_or_default(config_override.clone()).context("Failed to load configuration")?;

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
        println!("  3. ./reelforge-config.yaml");
        println!("  4. /etc/reelforge/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", config.to_yaml_string()?);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Cycle:".bold());
    println!(
        "  Interval: {}",
        humanize(config.spec.cycle.interval)
    );
    println!(
        "  Approval timeout: {}",
        humanize(config.spec.cycle.approval_timeout)
    );
    println!();

    println!("{}", "Stages:".bold());
    for stage in CycleStage::ALL {
        match config.stage_endpoint(stage) {
            Some(endpoint) => println!("  {:<10} {}", stage.as_str(), endpoint),
            None => println!("  {:<10} {}", stage.as_str(), "(unrouted)".red()),
        }
    }
    println!(
        "  Timeout: {}, retries: {}",
        humanize(config.spec.stages.timeout),
        config.spec.stages.retry.max_attempts
    );
    println!();

    println!("{}", "Platforms:".bold());
    if config.spec.platforms.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for platform in &config.spec.platforms {
        let state = if platform.enabled {
            "enabled".green()
        } else {
            "disabled".dimmed()
        };
        println!("  {} [{}] {}", platform.platform.to_string().bold(), state, platform.endpoint);
    }
    println!();

    println!("{}", "Observability:".bold());
    println!(
        "  Metrics: {}",
        config.spec.observability.metrics_listen.as_deref().unwrap_or("(disabled)")
    );
    println!("  Log level: {}", config.spec.observability.log_level);

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = OrchestratorConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    let unrouted = config.unrouted_stages();
    if !unrouted.is_empty() {
        let names: Vec<&str> = unrouted.iter().map(|s| s.as_str()).collect();
        println!(
            "{}",
            format!("⚠ No endpoint for stages: {} (`reelforge run` will refuse to start)", names.join(", ")).yellow()
        );
    }

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf) -> Result<()> {
    let yaml = OrchestratorConfigManifest::default().to_yaml_string()?;
    std::fs::write(&output, yaml).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}

fn humanize(duration: std::time::Duration) -> String {
    humantime_serde::re::humantime::format_duration(duration).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_writes_loadable_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reelforge-config.yaml");

        generate(path.clone()).unwrap();

        let loaded = OrchestratorConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.spec.cycle.interval, OrchestratorConfigManifest::default().spec.cycle.interval);
    }
}
