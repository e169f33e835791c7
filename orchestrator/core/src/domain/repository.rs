// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root, following the DDD Repository
//! pattern: one repository per aggregate, interface defined in the domain layer,
//! implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `CycleRepository` | `Cycle` | `InMemoryCycleRepository`, `PostgresCycleRepository` |
//! | `PlanRepository` | `Plan` | `InMemoryPlanRepository`, `PostgresPlanRepository` |
//! | `LearningRepository` | `Learning` | `InMemoryLearningRepository`, `PostgresLearningRepository` |
//! | `MeasurementRepository` | `MeasurementTarget` | `InMemoryMeasurementRepository`, `PostgresMeasurementRepository` |
//! | `ThoughtLogRepository` | `ThoughtLogEntry` | `InMemoryThoughtLogRepository`, `PostgresThoughtLogRepository` |
//! | `SpendLedger` | monthly spend | `InMemorySpendLedger`, `PostgresSpendLedger` |
//!
//! The relational store is shared with the dashboard, which only reads it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::cycle::{Cycle, CycleId, CycleStatus};
use crate::domain::learning::{GlobalLearning, Learning, LearningId};
use crate::domain::measurement::{
    AnalysisKind, CollectedMetrics, MeasurementTarget, MeasurementWindow, Platform, PlatformSuspension, Publication,
    TargetId,
};
use crate::domain::plan::{Plan, PlanDecision, PlanId};
use crate::domain::thought_log::{CycleTokenUsage, ThoughtLogEntry};

/// Storage backend selection for repositories.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

#[async_trait]
pub trait CycleRepository: Send + Sync {
    /// Insert a fresh `planning` cycle numbered one past the highest existing number.
    async fn create(&self) -> Result<Cycle, RepositoryError>;

    async fn save(&self, cycle: &Cycle) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: CycleId) -> Result<Option<Cycle>, RepositoryError>;

    async fn find_by_status(&self, status: CycleStatus) -> Result<Vec<Cycle>, RepositoryError>;

    /// Most recent first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Cycle>, RepositoryError>;
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn save(&self, plan: &Plan) -> Result<(), RepositoryError>;

    async fn find_latest_for_cycle(&self, cycle_id: CycleId) -> Result<Option<Plan>, RepositoryError>;

    async fn find_by_id(&self, id: PlanId) -> Result<Option<Plan>, RepositoryError>;

    /// Plans parked for a human decision, oldest first.
    async fn find_awaiting_decision(&self) -> Result<Vec<Plan>, RepositoryError>;

    /// Apply `decision` only while the plan is still `pending_approval`.
    /// `Conflict` when it was already decided, `NotFound` when it does not exist.
    async fn record_decision(&self, id: PlanId, decision: &PlanDecision) -> Result<Plan, RepositoryError>;
}

#[async_trait]
pub trait LearningRepository: Send + Sync {
    async fn save(&self, learning: &Learning) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: LearningId) -> Result<Option<Learning>, RepositoryError>;

    /// Write the confidence and application counters of an active learning.
    /// `Conflict` if it was deactivated in the meantime; activity and
    /// promotion are left untouched.
    async fn record_feedback(&self, learning: &Learning) -> Result<(), RepositoryError>;

    /// Active learnings, optionally scoped to one agent role.
    async fn find_active(&self, agent_role: Option<&str>) -> Result<Vec<Learning>, RepositoryError>;

    /// Deactivate every active learning with `confidence < threshold` in one
    /// atomic step and return exactly the ids that were flipped.
    async fn deactivate_below(
        &self,
        threshold: f64,
        agent_role: Option<&str>,
    ) -> Result<Vec<LearningId>, RepositoryError>;

    /// Store the global learning and link the source to it, atomically.
    async fn promote(&self, source: LearningId, global: &GlobalLearning) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MeasurementRepository: Send + Sync {
    async fn record_publication(
        &self,
        publication: &Publication,
        targets: &[MeasurementTarget],
    ) -> Result<(), RepositoryError>;

    /// Pending targets with `due_at <= now`, earliest first.
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        platform: Option<Platform>,
    ) -> Result<Vec<MeasurementTarget>, RepositoryError>;

    async fn find_by_id(&self, id: TargetId) -> Result<Option<MeasurementTarget>, RepositoryError>;

    /// Persist metrics and mark the target collected. A target that is no
    /// longer pending yields [`RepositoryError::Conflict`].
    async fn save_metrics(&self, id: TargetId, metrics: &CollectedMetrics) -> Result<(), RepositoryError>;

    /// Keep the target due and remember why the last attempt failed.
    async fn record_error(&self, id: TargetId, error: &str) -> Result<(), RepositoryError>;

    /// Remove the target from the due set permanently.
    async fn mark_failed(&self, id: TargetId, error: &str) -> Result<(), RepositoryError>;

    async fn queue_analysis(
        &self,
        content_id: &str,
        kind: AnalysisKind,
        window: MeasurementWindow,
    ) -> Result<(), RepositoryError>;

    async fn last_posted_at(
        &self,
        account_id: &str,
        platform: Platform,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError>;

    /// Distinct `(account, platform)` pairs that have ever posted.
    async fn known_accounts(&self) -> Result<Vec<(String, Platform)>, RepositoryError>;

    /// Park collection for `platform`. An existing suspension keeps its
    /// original reason and timestamp.
    async fn suspend_platform(&self, platform: Platform, reason: &str) -> Result<(), RepositoryError>;

    /// Clear a suspension. Returns whether one existed.
    async fn resume_platform(&self, platform: Platform) -> Result<bool, RepositoryError>;

    async fn find_suspension(&self, platform: Platform) -> Result<Option<PlatformSuspension>, RepositoryError>;

    async fn list_suspensions(&self) -> Result<Vec<PlatformSuspension>, RepositoryError>;
}

#[async_trait]
pub trait ThoughtLogRepository: Send + Sync {
    async fn record(&self, entry: &ThoughtLogEntry) -> Result<(), RepositoryError>;

    async fn list_for_cycle(&self, cycle_id: CycleId) -> Result<Vec<ThoughtLogEntry>, RepositoryError>;

    async fn cycle_token_usage(&self, cycle_id: CycleId) -> Result<CycleTokenUsage, RepositoryError>;
}

/// Outcome of an atomic read-compare-commit against the monthly total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LedgerCommit {
    Committed { total_usd: f64 },
    Rejected { current_usd: f64 },
}

/// Running monthly spend, keyed by `YYYY-MM`.
#[async_trait]
pub trait SpendLedger: Send + Sync {
    async fn current(&self, month: &str) -> Result<f64, RepositoryError>;

    /// Unconditionally add spend (already incurred). Returns the new total.
    async fn record(&self, month: &str, amount_usd: f64) -> Result<f64, RepositoryError>;

    /// Add `amount_usd` only if `current + amount_usd <= limit_usd`, as one
    /// transactional step.
    async fn try_commit(&self, month: &str, amount_usd: f64, limit_usd: f64) -> Result<LedgerCommit, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
