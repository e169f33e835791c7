// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cost Allocator & Budget Gate
//!
//! Resolves each stage's model tier (with live `MODEL_TIER_OVERRIDES`), prices
//! token usage, accumulates spend into the monthly ledger and evaluates the
//! budget gate in front of production.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Cost governance over `SpendLedger`
//!
//! The gate commits the production estimate in the same atomic step that
//! compares it against `MONTHLY_BUDGET_LIMIT_USD`, so two concurrent approvals
//! can never both pass when only one fits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::cost::{
    estimate_cycle_cost, get_model_for_node, model_allocation, month_key, CycleCostEstimate, ModelTier,
    NodeAllocation, TierOverrides, TokenUsage,
};
use crate::domain::repository::{LedgerCommit, RepositoryError, SpendLedger};
use crate::domain::settings::{keys, SettingsError, SettingsProvider};

#[derive(Debug, thiserror::Error)]
pub enum CostError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("MODEL_TIER_OVERRIDES is not a valid tier map: {0}")]
    InvalidOverrides(String),
}

/// Result of evaluating the budget gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum BudgetDecision {
    /// Estimate committed; new monthly total.
    Allowed { total_usd: f64 },
    Blocked {
        current_usd: f64,
        task_cost_usd: f64,
        limit_usd: f64,
    },
}

impl BudgetDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, BudgetDecision::Allowed { .. })
    }
}

pub struct CostAllocator {
    ledger: Arc<dyn SpendLedger>,
    settings: Arc<dyn SettingsProvider>,
}

impl CostAllocator {
    pub fn new(ledger: Arc<dyn SpendLedger>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self { ledger, settings }
    }

    pub async fn overrides(&self) -> Result<TierOverrides, CostError> {
        let raw = self.settings.get(keys::MODEL_TIER_OVERRIDES).await?;
        let raw = match raw {
            // The dashboard stores JSON objects as text.
            serde_json::Value::String(s) if s.trim().is_empty() => return Ok(TierOverrides::new()),
            serde_json::Value::String(s) => {
                serde_json::from_str(&s).map_err(|e| CostError::InvalidOverrides(e.to_string()))?
            }
            serde_json::Value::Null => return Ok(TierOverrides::new()),
            other => other,
        };
        serde_json::from_value(raw).map_err(|e| CostError::InvalidOverrides(e.to_string()))
    }

    pub async fn tier_for(&self, node: &str) -> Result<ModelTier, CostError> {
        Ok(get_model_for_node(node, &self.overrides().await?))
    }

    pub async fn allocation(&self) -> Result<Vec<NodeAllocation>, CostError> {
        Ok(model_allocation(&self.overrides().await?))
    }

    pub async fn estimate(&self, estimates: &[(String, TokenUsage)]) -> Result<CycleCostEstimate, CostError> {
        Ok(estimate_cycle_cost(estimates, &self.overrides().await?))
    }

    /// Add already-incurred spend to the current month. Returns the new total.
    pub async fn record_spend(&self, amount_usd: f64, at: DateTime<Utc>) -> Result<f64, CostError> {
        if amount_usd <= 0.0 {
            return Ok(self.ledger.current(&month_key(at)).await?);
        }
        let total = self.ledger.record(&month_key(at), amount_usd).await?;
        metrics::gauge!("reelforge_monthly_spend_usd").set(total);
        Ok(total)
    }

    pub async fn current_spend(&self, at: DateTime<Utc>) -> Result<f64, CostError> {
        Ok(self.ledger.current(&month_key(at)).await?)
    }

    /// Budget gate: block when `current + task_cost > MONTHLY_BUDGET_LIMIT_USD`,
    /// otherwise commit `task_cost` to the month.
    pub async fn reserve_production(
        &self,
        task_cost_usd: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<BudgetDecision, CostError> {
        let limit = self.settings.get_number(keys::MONTHLY_BUDGET_LIMIT_USD).await?;
        let task_cost = match task_cost_usd {
            Some(cost) => cost,
            None => self.settings.get_number(keys::PRODUCTION_COST_ESTIMATE_USD).await?,
        };
        let month = month_key(at);

        match self.ledger.try_commit(&month, task_cost, limit).await? {
            LedgerCommit::Committed { total_usd } => {
                debug!(%month, task_cost, total_usd, limit, "Production budget reserved");
                metrics::gauge!("reelforge_monthly_spend_usd").set(total_usd);
                Ok(BudgetDecision::Allowed { total_usd })
            }
            LedgerCommit::Rejected { current_usd } => {
                warn!(%month, current_usd, task_cost, limit, "Budget gate blocked production");
                metrics::counter!("reelforge_budget_blocks_total").increment(1);
                Ok(BudgetDecision::Blocked {
                    current_usd,
                    task_cost_usd: task_cost,
                    limit_usd: limit,
                })
            }
        }
    }
}
