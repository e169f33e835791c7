// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! This module provides infrastructure implementations of repository abstractions
//! defined in the domain layer, following the Repository pattern from DDD.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! Production implementations backed by the shared relational store:
//! - **PostgresCycleRepository** - cycles and their lifecycle
//! - **PostgresPlanRepository** - content plans and revision state
//! - **PostgresLearningRepository** - learnings and global learnings
//! - **PostgresMeasurementRepository** - publications, targets, metrics, analysis queue
//! - **PostgresThoughtLogRepository** - per-stage thought log
//! - **PostgresSpendLedger** - monthly spend with transactional budget commit
//!
//! ## In-Memory Repositories
//!
//! Thread-safe implementations for tests and local development. They honour
//! the same contracts, including the terminal-cycle write guard and the atomic
//! budget commit.
//!
//! # Design Principles
//!
//! 1. **Technology Agnostic**: Domain layer has no knowledge of persistence
//! 2. **Transactional Consistency**: Operations are atomic where the contract says so
//! 3. **Error Mapping**: Infrastructure errors mapped to domain RepositoryError

pub mod postgres_cycle;
pub mod postgres_ledger;
pub mod postgres_learning;
pub mod postgres_measurement;
pub mod postgres_plan;
pub mod postgres_thought_log;

pub use postgres_cycle::PostgresCycleRepository;
pub use postgres_ledger::PostgresSpendLedger;
pub use postgres_learning::PostgresLearningRepository;
pub use postgres_measurement::PostgresMeasurementRepository;
pub use postgres_plan::PostgresPlanRepository;
pub use postgres_thought_log::PostgresThoughtLogRepository;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::domain::cycle::{Cycle, CycleId, CycleStatus};
use crate::domain::learning::{GlobalLearning, Learning, LearningId};
use crate::domain::measurement::{
    AnalysisKind, CollectedMetrics, MeasurementTarget, MeasurementWindow, Platform, PlatformSuspension, Publication,
    TargetId, TargetStatus,
};
use crate::domain::plan::{ApprovalStatus, Plan, PlanDecision, PlanId};
use crate::domain::repository::{
    CycleRepository, LearningRepository, LedgerCommit, MeasurementRepository, PlanRepository, RepositoryError,
    SpendLedger, ThoughtLogRepository,
};
use crate::domain::thought_log::{CycleTokenUsage, ThoughtLogEntry};

#[derive(Clone, Default)]
pub struct InMemoryCycleRepository {
    cycles: Arc<RwLock<HashMap<CycleId, Cycle>>>,
}

impl InMemoryCycleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CycleRepository for InMemoryCycleRepository {
    async fn create(&self) -> Result<Cycle, RepositoryError> {
        let mut cycles = self.cycles.write();
        let next_id = cycles.keys().map(|id| id.0).max().unwrap_or(0) + 1;
        let next_number = cycles.values().map(|c| c.cycle_number).max().unwrap_or(0) + 1;
        let cycle = Cycle::new(CycleId(next_id), next_number);
        cycles.insert(cycle.id, cycle.clone());
        Ok(cycle)
    }

    async fn save(&self, cycle: &Cycle) -> Result<(), RepositoryError> {
        let mut cycles = self.cycles.write();
        match cycles.get(&cycle.id) {
            Some(stored) if stored.status.is_terminal() => Err(RepositoryError::Conflict(format!(
                "cycle {} is already {}",
                cycle.id, stored.status
            ))),
            Some(_) => {
                cycles.insert(cycle.id, cycle.clone());
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("cycle {}", cycle.id))),
        }
    }

    async fn find_by_id(&self, id: CycleId) -> Result<Option<Cycle>, RepositoryError> {
        Ok(self.cycles.read().get(&id).cloned())
    }

    async fn find_by_status(&self, status: CycleStatus) -> Result<Vec<Cycle>, RepositoryError> {
        let mut found: Vec<Cycle> = self
            .cycles
            .read()
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.id);
        Ok(found)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Cycle>, RepositoryError> {
        let mut all: Vec<Cycle> = self.cycles.read().values().cloned().collect();
        all.sort_by(|a, b| b.id.cmp(&a.id));
        all.truncate(limit);
        Ok(all)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPlanRepository {
    // Insertion order doubles as creation order.
    plans: Arc<RwLock<Vec<Plan>>>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plans_for_cycle(&self, cycle_id: CycleId) -> Vec<Plan> {
        self.plans
            .read()
            .iter()
            .filter(|p| p.cycle_id == cycle_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn save(&self, plan: &Plan) -> Result<(), RepositoryError> {
        let mut plans = self.plans.write();
        match plans.iter_mut().find(|p| p.id == plan.id) {
            Some(existing) => *existing = plan.clone(),
            None => plans.push(plan.clone()),
        }
        Ok(())
    }

    async fn find_latest_for_cycle(&self, cycle_id: CycleId) -> Result<Option<Plan>, RepositoryError> {
        Ok(self.plans.read().iter().rev().find(|p| p.cycle_id == cycle_id).cloned())
    }

    async fn find_by_id(&self, id: PlanId) -> Result<Option<Plan>, RepositoryError> {
        Ok(self.plans.read().iter().find(|p| p.id == id).cloned())
    }

    async fn find_awaiting_decision(&self) -> Result<Vec<Plan>, RepositoryError> {
        let mut parked: Vec<Plan> = self
            .plans
            .read()
            .iter()
            .filter(|p| p.approval_status == ApprovalStatus::PendingApproval)
            .cloned()
            .collect();
        parked.sort_by_key(|p| p.updated_at);
        Ok(parked)
    }

    async fn record_decision(&self, id: PlanId, decision: &PlanDecision) -> Result<Plan, RepositoryError> {
        let mut plans = self.plans.write();
        let plan = plans
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("plan {id}")))?;
        plan.apply_decision(decision)
            .map_err(|e| RepositoryError::Conflict(e.to_string()))?;
        Ok(plan.clone())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryLearningRepository {
    learnings: Arc<RwLock<HashMap<LearningId, Learning>>>,
    global: Arc<RwLock<Vec<GlobalLearning>>>,
}

impl InMemoryLearningRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_learnings(&self) -> Vec<GlobalLearning> {
        self.global.read().clone()
    }
}

#[async_trait]
impl LearningRepository for InMemoryLearningRepository {
    async fn save(&self, learning: &Learning) -> Result<(), RepositoryError> {
        self.learnings.write().insert(learning.id, learning.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: LearningId) -> Result<Option<Learning>, RepositoryError> {
        Ok(self.learnings.read().get(&id).cloned())
    }

    async fn record_feedback(&self, learning: &Learning) -> Result<(), RepositoryError> {
        let mut learnings = self.learnings.write();
        let stored = learnings
            .get_mut(&learning.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("learning {}", learning.id)))?;
        if !stored.is_active() {
            return Err(RepositoryError::Conflict(format!("learning {} is inactive", learning.id)));
        }
        stored.confidence = learning.confidence;
        stored.times_applied = learning.times_applied;
        stored.times_successful = learning.times_successful;
        stored.updated_at = learning.updated_at;
        stored.last_applied_at = learning.last_applied_at;
        Ok(())
    }

    async fn find_active(&self, agent_role: Option<&str>) -> Result<Vec<Learning>, RepositoryError> {
        let mut active: Vec<Learning> = self
            .learnings
            .read()
            .values()
            .filter(|l| l.is_active() && agent_role.map_or(true, |role| l.agent_role == role))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.confidence.value().total_cmp(&a.confidence.value()));
        Ok(active)
    }

    async fn deactivate_below(
        &self,
        threshold: f64,
        agent_role: Option<&str>,
    ) -> Result<Vec<LearningId>, RepositoryError> {
        let mut learnings = self.learnings.write();
        let mut flipped = Vec::new();
        for learning in learnings.values_mut() {
            if learning.is_active()
                && learning.confidence.value() < threshold
                && agent_role.map_or(true, |role| learning.agent_role == role)
            {
                learning.deactivate();
                flipped.push(learning.id);
            }
        }
        Ok(flipped)
    }

    async fn promote(&self, source: LearningId, global: &GlobalLearning) -> Result<(), RepositoryError> {
        let mut learnings = self.learnings.write();
        let learning = learnings
            .get_mut(&source)
            .ok_or_else(|| RepositoryError::NotFound(format!("learning {source}")))?;
        if learning.promoted_to.is_some() {
            return Err(RepositoryError::Conflict(format!("learning {source} already promoted")));
        }
        learning.promoted_to = Some(global.id);
        learning.updated_at = Utc::now();
        self.global.write().push(global.clone());
        Ok(())
    }
}

/// Analysis request queued after a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedAnalysis {
    pub content_id: String,
    pub kind: AnalysisKind,
    pub window: MeasurementWindow,
    pub queued_at: DateTime<Utc>,
}

#[derive(Default)]
struct MeasurementState {
    publications: Vec<Publication>,
    targets: HashMap<TargetId, MeasurementTarget>,
    metrics: HashMap<TargetId, CollectedMetrics>,
    analyses: Vec<QueuedAnalysis>,
    suspensions: HashMap<Platform, PlatformSuspension>,
}

#[derive(Clone, Default)]
pub struct InMemoryMeasurementRepository {
    state: Arc<RwLock<MeasurementState>>,
}

impl InMemoryMeasurementRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collected_metrics(&self, id: TargetId) -> Option<CollectedMetrics> {
        self.state.read().metrics.get(&id).cloned()
    }

    pub fn queued_analyses(&self) -> Vec<QueuedAnalysis> {
        self.state.read().analyses.clone()
    }

    pub fn targets(&self) -> Vec<MeasurementTarget> {
        let mut targets: Vec<_> = self.state.read().targets.values().cloned().collect();
        targets.sort_by_key(|t| t.due_at);
        targets
    }
}

#[async_trait]
impl MeasurementRepository for InMemoryMeasurementRepository {
    async fn record_publication(
        &self,
        publication: &Publication,
        targets: &[MeasurementTarget],
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if state.publications.iter().any(|p| p.id == publication.id) {
            return Err(RepositoryError::Conflict(format!("publication {} already recorded", publication.id)));
        }
        state.publications.push(publication.clone());
        for target in targets {
            state.targets.insert(target.id, target.clone());
        }
        Ok(())
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        platform: Option<Platform>,
    ) -> Result<Vec<MeasurementTarget>, RepositoryError> {
        let mut due: Vec<MeasurementTarget> = self
            .state
            .read()
            .targets
            .values()
            .filter(|t| t.is_due(now) && platform.map_or(true, |p| t.platform == p))
            .cloned()
            .collect();
        due.sort_by_key(|t| t.due_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn find_by_id(&self, id: TargetId) -> Result<Option<MeasurementTarget>, RepositoryError> {
        Ok(self.state.read().targets.get(&id).cloned())
    }

    async fn save_metrics(&self, id: TargetId, metrics: &CollectedMetrics) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let target = state
            .targets
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("measurement target {id}")))?;
        if target.status != TargetStatus::Pending {
            return Err(RepositoryError::Conflict(format!(
                "measurement target {id} is {}",
                target.status.as_str()
            )));
        }
        target.status = TargetStatus::Collected;
        target.collected_at = Some(metrics.collected_at);
        target.last_error = None;
        state.metrics.insert(id, metrics.clone());
        Ok(())
    }

    async fn record_error(&self, id: TargetId, error: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let target = state
            .targets
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("measurement target {id}")))?;
        target.last_error = Some(error.to_string());
        Ok(())
    }

    async fn mark_failed(&self, id: TargetId, error: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let target = state
            .targets
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("measurement target {id}")))?;
        target.status = TargetStatus::Failed;
        target.last_error = Some(error.to_string());
        Ok(())
    }

    async fn queue_analysis(
        &self,
        content_id: &str,
        kind: AnalysisKind,
        window: MeasurementWindow,
    ) -> Result<(), RepositoryError> {
        self.state.write().analyses.push(QueuedAnalysis {
            content_id: content_id.to_string(),
            kind,
            window,
            queued_at: Utc::now(),
        });
        Ok(())
    }

    async fn last_posted_at(
        &self,
        account_id: &str,
        platform: Platform,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        Ok(self
            .state
            .read()
            .publications
            .iter()
            .filter(|p| p.account_id == account_id && p.platform == platform)
            .map(|p| p.posted_at)
            .max())
    }

    async fn known_accounts(&self) -> Result<Vec<(String, Platform)>, RepositoryError> {
        let accounts: BTreeSet<(String, Platform)> = self
            .state
            .read()
            .publications
            .iter()
            .map(|p| (p.account_id.clone(), p.platform))
            .collect();
        Ok(accounts.into_iter().collect())
    }

    async fn suspend_platform(&self, platform: Platform, reason: &str) -> Result<(), RepositoryError> {
        self.state
            .write()
            .suspensions
            .entry(platform)
            .or_insert_with(|| PlatformSuspension {
                platform,
                reason: reason.to_string(),
                suspended_at: Utc::now(),
            });
        Ok(())
    }

    async fn resume_platform(&self, platform: Platform) -> Result<bool, RepositoryError> {
        Ok(self.state.write().suspensions.remove(&platform).is_some())
    }

    async fn find_suspension(&self, platform: Platform) -> Result<Option<PlatformSuspension>, RepositoryError> {
        Ok(self.state.read().suspensions.get(&platform).cloned())
    }

    async fn list_suspensions(&self) -> Result<Vec<PlatformSuspension>, RepositoryError> {
        let mut suspensions: Vec<_> = self.state.read().suspensions.values().cloned().collect();
        suspensions.sort_by_key(|s| s.platform);
        Ok(suspensions)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryThoughtLogRepository {
    entries: Arc<RwLock<Vec<ThoughtLogEntry>>>,
}

impl InMemoryThoughtLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThoughtLogRepository for InMemoryThoughtLogRepository {
    async fn record(&self, entry: &ThoughtLogEntry) -> Result<(), RepositoryError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    async fn list_for_cycle(&self, cycle_id: CycleId) -> Result<Vec<ThoughtLogEntry>, RepositoryError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.cycle_id == cycle_id)
            .cloned()
            .collect())
    }

    async fn cycle_token_usage(&self, cycle_id: CycleId) -> Result<CycleTokenUsage, RepositoryError> {
        let entries = self.entries.read();
        Ok(CycleTokenUsage::from_entries(
            entries.iter().filter(|e| e.cycle_id == cycle_id),
        ))
    }
}

#[derive(Clone, Default)]
pub struct InMemorySpendLedger {
    months: Arc<Mutex<HashMap<String, f64>>>,
}

impl InMemorySpendLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpendLedger for InMemorySpendLedger {
    async fn current(&self, month: &str) -> Result<f64, RepositoryError> {
        Ok(self.months.lock().get(month).copied().unwrap_or(0.0))
    }

    async fn record(&self, month: &str, amount_usd: f64) -> Result<f64, RepositoryError> {
        let mut months = self.months.lock();
        let total = months.entry(month.to_string()).or_insert(0.0);
        *total += amount_usd;
        Ok(*total)
    }

    async fn try_commit(&self, month: &str, amount_usd: f64, limit_usd: f64) -> Result<LedgerCommit, RepositoryError> {
        let mut months = self.months.lock();
        let total = months.entry(month.to_string()).or_insert(0.0);
        if crate::domain::cost::exceeds_budget(*total, amount_usd, limit_usd) {
            return Ok(LedgerCommit::Rejected { current_usd: *total });
        }
        *total += amount_usd;
        Ok(LedgerCommit::Committed { total_usd: *total })
    }
}
