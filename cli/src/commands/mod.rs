// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Reelforge CLI

pub mod approval;
pub mod config;
pub mod cooldown;
pub mod cost;
pub mod cycle;
pub mod db;
pub mod learning;
pub mod measurement;
pub mod run;

pub use self::approval::ApprovalCommand;
pub use self::config::ConfigCommand;
pub use self::cooldown::CooldownCommand;
pub use self::cost::CostCommand;
pub use self::cycle::CycleCommand;
pub use self::db::DbCommand;
pub use self::learning::LearningCommand;
pub use self::measurement::MeasurementCommand;
pub use self::run::RunArgs;

use anyhow::{Context, Result};
use std::path::PathBuf;

use reelforge_core::infrastructure::config::OrchestratorConfigManifest;

/// Load, override from env and validate the deployment config.
pub(crate) fn load_config(path: Option<PathBuf>) -> Result<OrchestratorConfigManifest> {
    let config = OrchestratorConfigManifest::load_or_default(path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}
