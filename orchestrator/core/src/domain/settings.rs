// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Runtime Settings Contract
//!
//! Every tunable threshold the orchestrator branches on lives in the persisted
//! `system_settings` key/value table. Components never hold a copy of a value:
//! each decision performs a fresh read through [`SettingsProvider`], so an
//! operator editing a threshold mid-cycle is visible on the very next read.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Configuration-provider abstraction injected into every service
//! - **Implementations:** `PostgresSettingsProvider`, `InMemorySettingsProvider`

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::repository::RepositoryError;

/// Well-known setting keys.
pub mod keys {
    pub const CONFIDENCE_GROWTH_RATE: &str = "CONFIDENCE_GROWTH_RATE";
    pub const CONFIDENCE_DECAY_RATE: &str = "CONFIDENCE_DECAY_RATE";
    pub const LEARNING_INITIAL_CONFIDENCE: &str = "LEARNING_INITIAL_CONFIDENCE";
    pub const LEARNING_DEACTIVATION_THRESHOLD: &str = "LEARNING_DEACTIVATION_THRESHOLD";
    pub const LEARNING_PROMOTION_THRESHOLD: &str = "LEARNING_PROMOTION_THRESHOLD";
    pub const LEARNING_PROMOTION_MIN_APPLIED: &str = "LEARNING_PROMOTION_MIN_APPLIED";
    pub const LEARNING_FAILURE_THRESHOLD: &str = "LEARNING_FAILURE_THRESHOLD";
    pub const MAX_STRATEGY_REVISIONS: &str = "MAX_STRATEGY_REVISIONS";
    pub const QUALITY_PASS_THRESHOLD: &str = "QUALITY_PASS_THRESHOLD";
    pub const MONTHLY_BUDGET_LIMIT_USD: &str = "MONTHLY_BUDGET_LIMIT_USD";
    pub const PRODUCTION_COST_ESTIMATE_USD: &str = "PRODUCTION_COST_ESTIMATE_USD";
    pub const STRATEGY_APPROVAL_REQUIRED: &str = "STRATEGY_APPROVAL_REQUIRED";
    pub const MODEL_TIER_OVERRIDES: &str = "MODEL_TIER_OVERRIDES";
    pub const PLATFORM_COOLDOWN_HOURS: &str = "PLATFORM_COOLDOWN_HOURS";
    pub const MEASUREMENT_POLL_INTERVAL_SEC: &str = "MEASUREMENT_POLL_INTERVAL_SEC";
    pub const MEASUREMENT_BATCH_SIZE: &str = "MEASUREMENT_BATCH_SIZE";
    pub const METRICS_RETRY_MAX_ATTEMPTS: &str = "METRICS_RETRY_MAX_ATTEMPTS";
    pub const METRICS_RETRY_BASE_DELAY_MS: &str = "METRICS_RETRY_BASE_DELAY_MS";
}

/// Seed values shipped with a fresh deployment (mirrors the migration).
pub fn default_settings() -> Vec<(&'static str, Value)> {
    use serde_json::json;
    vec![
        (keys::CONFIDENCE_GROWTH_RATE, json!(0.1)),
        (keys::CONFIDENCE_DECAY_RATE, json!(0.15)),
        (keys::LEARNING_INITIAL_CONFIDENCE, json!(0.5)),
        (keys::LEARNING_DEACTIVATION_THRESHOLD, json!(0.2)),
        (keys::LEARNING_PROMOTION_THRESHOLD, json!(0.8)),
        (keys::LEARNING_PROMOTION_MIN_APPLIED, json!(3)),
        (keys::LEARNING_FAILURE_THRESHOLD, json!(0.3)),
        (keys::MAX_STRATEGY_REVISIONS, json!(3)),
        (keys::QUALITY_PASS_THRESHOLD, json!(8.0)),
        (keys::MONTHLY_BUDGET_LIMIT_USD, json!(3000)),
        (keys::PRODUCTION_COST_ESTIMATE_USD, json!(15)),
        (keys::STRATEGY_APPROVAL_REQUIRED, json!(false)),
        (keys::MODEL_TIER_OVERRIDES, json!({})),
        (keys::PLATFORM_COOLDOWN_HOURS, json!(4)),
        (keys::MEASUREMENT_POLL_INTERVAL_SEC, json!(300)),
        (keys::MEASUREMENT_BATCH_SIZE, json!(20)),
        (keys::METRICS_RETRY_MAX_ATTEMPTS, json!(3)),
        (keys::METRICS_RETRY_BASE_DELAY_MS, json!(1000)),
    ]
}

/// Typed live access to `system_settings`.
///
/// Implementors only provide [`SettingsProvider::get`]; the typed accessors
/// coerce the stored JSON value. Numbers stored as JSON strings (as the
/// dashboard writes them) are accepted.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Raw setting value. Errors with [`SettingsError::NotFound`] for unknown keys.
    async fn get(&self, key: &str) -> Result<Value, SettingsError>;

    async fn get_number(&self, key: &str) -> Result<f64, SettingsError> {
        let value = self.get(key).await?;
        coerce_number(key, &value)
    }

    async fn get_bool(&self, key: &str) -> Result<bool, SettingsError> {
        let value = self.get(key).await?;
        match value {
            Value::Bool(b) => Ok(b),
            Value::String(s) => Ok(s.eq_ignore_ascii_case("true")),
            Value::Number(n) => Ok(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
            _ => Err(SettingsError::InvalidType {
                key: key.to_string(),
                expected: "boolean",
            }),
        }
    }

    async fn get_string(&self, key: &str) -> Result<String, SettingsError> {
        match self.get(key).await? {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    /// Non-negative whole number (counts, limits, seconds).
    async fn get_count(&self, key: &str) -> Result<u32, SettingsError> {
        let n = self.get_number(key).await?;
        if !n.is_finite() || n < 0.0 {
            return Err(SettingsError::InvalidType {
                key: key.to_string(),
                expected: "non-negative integer",
            });
        }
        Ok(n.floor().min(u32::MAX as f64) as u32)
    }
}

fn coerce_number(key: &str, value: &Value) -> Result<f64, SettingsError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| SettingsError::InvalidType {
        key: key.to_string(),
        expected: "number",
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Setting not found: {0}")]
    NotFound(String),

    #[error("Setting {key} is not a valid {expected}")]
    InvalidType { key: String, expected: &'static str },

    #[error("Settings store error: {0}")]
    Store(#[from] RepositoryError),
}
