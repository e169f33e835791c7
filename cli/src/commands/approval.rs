// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Human approval commands
//!
//! Decisions are written into the plan row; the running daemon picks them up
//! on its next poll.
//!
//! # Usage
//!
//! ```bash
//! reelforge approval list
//! reelforge approval approve <PLAN_ID> --by alice
//! reelforge approval reject <PLAN_ID> --category data_insufficient --reason "need trend data"
//! ```

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use uuid::Uuid;

use reelforge_core::domain::plan::PlanId;

use crate::bootstrap::Services;

#[derive(Subcommand)]
pub enum ApprovalCommand {
    /// List plans waiting for a human decision
    List,

    /// Approve a parked plan
    Approve {
        /// Plan ID
        plan_id: Uuid,

        /// Optional note for the production stage
        #[arg(long)]
        feedback: Option<String>,

        /// Who is signing off
        #[arg(long = "by")]
        decided_by: Option<String>,
    },

    /// Reject a parked plan and send it back upstream
    Reject {
        /// Plan ID
        plan_id: Uuid,

        /// plan_revision, data_insufficient or hypothesis_weak
        #[arg(long)]
        category: Option<String>,

        /// Why the plan was rejected
        #[arg(long)]
        reason: String,

        /// Who is rejecting
        #[arg(long = "by")]
        decided_by: Option<String>,
    },
}

pub async fn handle_command(command: ApprovalCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let services = Services::connect(&config).await?;
    let gate = &services.approvals;

    match command {
        ApprovalCommand::List => {
            let pending = gate.list_pending().await?;
            if pending.is_empty() {
                println!("{}", "No plans awaiting approval".dimmed());
                return Ok(());
            }
            println!("{:<38} {:<8} {:<10} {}", "PLAN", "CYCLE", "REVISIONS", "PARKED");
            for plan in &pending {
                println!(
                    "{:<38} {:<8} {:<10} {}",
                    plan.id.to_string(),
                    plan.cycle_id.to_string(),
                    plan.revision_count,
                    plan.updated_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
                );
            }
        }
        ApprovalCommand::Approve {
            plan_id,
            feedback,
            decided_by,
        } => {
            let plan = gate.submit_approval(PlanId(plan_id), feedback, decided_by).await?;
            println!("{} plan {} approved", "✓".green(), plan.id);
        }
        ApprovalCommand::Reject {
            plan_id,
            category,
            reason,
            decided_by,
        } => {
            let plan = gate
                .submit_rejection(PlanId(plan_id), category.as_deref(), reason, decided_by)
                .await?;
            println!(
                "{} plan {} rejected ({})",
                "✗".red(),
                plan.id,
                plan.rejection_category.map(|c| c.as_str()).unwrap_or("unspecified")
            );
        }
    }

    Ok(())
}
