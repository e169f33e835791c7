// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::cost::ModelTier;
use crate::domain::cycle::{CycleId, CycleStage};
use crate::domain::learning::LearningId;
use crate::domain::measurement::{AnalysisKind, MeasurementWindow, Platform, TargetId};
use crate::domain::plan::PlanId;
use crate::domain::revision::RejectionCategory;

/// Cycle lifecycle events emitted by the cycle engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CycleEvent {
    CycleStarted {
        cycle_id: CycleId,
        cycle_number: i64,
        started_at: DateTime<Utc>,
    },
    StageCompleted {
        cycle_id: CycleId,
        stage: CycleStage,
        tier: ModelTier,
        cost_usd: f64,
        duration_ms: u64,
        completed_at: DateTime<Utc>,
    },
    PlanRevised {
        cycle_id: CycleId,
        plan_id: PlanId,
        category: Option<RejectionCategory>,
        target: CycleStage,
        revision_count: u32,
    },
    PlanForceApproved {
        cycle_id: CycleId,
        plan_id: PlanId,
        revision_count: u32,
    },
    CycleDeferred {
        cycle_id: CycleId,
        reason: String,
        deferred_at: DateTime<Utc>,
    },
    CycleResumed {
        cycle_id: CycleId,
        resumed_at: DateTime<Utc>,
    },
    CycleCompleted {
        cycle_id: CycleId,
        completed_at: DateTime<Utc>,
    },
    CycleFailed {
        cycle_id: CycleId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

impl CycleEvent {
    pub fn cycle_id(&self) -> CycleId {
        match self {
            CycleEvent::CycleStarted { cycle_id, .. }
            | CycleEvent::StageCompleted { cycle_id, .. }
            | CycleEvent::PlanRevised { cycle_id, .. }
            | CycleEvent::PlanForceApproved { cycle_id, .. }
            | CycleEvent::CycleDeferred { cycle_id, .. }
            | CycleEvent::CycleResumed { cycle_id, .. }
            | CycleEvent::CycleCompleted { cycle_id, .. }
            | CycleEvent::CycleFailed { cycle_id, .. } => *cycle_id,
        }
    }
}

/// Learning store changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LearningEvent {
    LearningRecorded {
        learning_id: LearningId,
        agent_role: String,
        category: String,
        recorded_at: DateTime<Utc>,
    },
    ConfidenceUpdated {
        learning_id: LearningId,
        previous: f64,
        current: f64,
        success: bool,
        updated_at: DateTime<Utc>,
    },
    LearningsDeactivated {
        learning_ids: Vec<LearningId>,
        threshold: f64,
        swept_at: DateTime<Utc>,
    },
    LearningPromoted {
        learning_id: LearningId,
        global_learning_id: Uuid,
        global_category: String,
        promoted_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MeasurementEvent {
    MetricsCollected {
        target_id: TargetId,
        platform: Platform,
        window: MeasurementWindow,
        engagement_rate: f64,
        collected_at: DateTime<Utc>,
    },
    CollectionDeferred {
        target_id: TargetId,
        platform: Platform,
        attempts: u32,
        reason: String,
    },
    TargetFailed {
        target_id: TargetId,
        platform: Platform,
        reason: String,
    },
    AnalysisQueued {
        content_id: String,
        kind: AnalysisKind,
        window: MeasurementWindow,
    },
}

/// Conditions a human operator must see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperatorAlert {
    BudgetExceeded {
        cycle_id: CycleId,
        current_spend_usd: f64,
        task_cost_usd: f64,
        monthly_limit_usd: f64,
    },
    PlanForceApproved {
        cycle_id: CycleId,
        plan_id: PlanId,
        revision_count: u32,
    },
    PlatformUnauthorized {
        platform: Platform,
        message: String,
    },
    CycleFailed {
        cycle_id: CycleId,
        reason: String,
    },
}

impl OperatorAlert {
    pub fn kind(&self) -> &'static str {
        match self {
            OperatorAlert::BudgetExceeded { .. } => "budget_exceeded",
            OperatorAlert::PlanForceApproved { .. } => "plan_force_approved",
            OperatorAlert::PlatformUnauthorized { .. } => "platform_unauthorized",
            OperatorAlert::CycleFailed { .. } => "cycle_failed",
        }
    }
}
