// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Plan Aggregate
//!
//! A content proposal awaiting approval. Created by `plan_content`, mutated by
//! `approve_plan` and the quality gate, terminal once approved or
//! force-approved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::cycle::CycleId;
use crate::domain::revision::RejectionCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanId(pub Uuid);

impl PlanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Rejected,
    /// Parked for a human decision written into the plan row.
    PendingApproval,
    Approved,
    /// Approved by the system after `MAX_STRATEGY_REVISIONS` was reached.
    ForceApproved,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::PendingApproval => "pending_approval",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::ForceApproved => "force_approved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ApprovalStatus::Pending),
            "rejected" => Some(ApprovalStatus::Rejected),
            "pending_approval" => Some(ApprovalStatus::PendingApproval),
            "approved" => Some(ApprovalStatus::Approved),
            "force_approved" => Some(ApprovalStatus::ForceApproved),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::ForceApproved)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub cycle_id: CycleId,
    /// Opaque proposal body produced by the planning stage.
    pub content: serde_json::Value,
    pub revision_count: u32,
    pub rejection_category: Option<RejectionCategory>,
    pub approval_status: ApprovalStatus,
    pub approval_feedback: Option<String>,
    /// Aggregate quality score, once scored.
    pub quality_score: Option<f64>,
    /// Who signed off or rejected during human approval.
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(cycle_id: CycleId, content: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: PlanId::new(),
            cycle_id,
            content,
            revision_count: 0,
            rejection_category: None,
            approval_status: ApprovalStatus::Pending,
            approval_feedback: None,
            quality_score: None,
            decided_by: None,
            decided_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the proposal with a revised one; counters survive.
    pub fn revise(&mut self, content: serde_json::Value) {
        self.content = content;
        self.approval_status = ApprovalStatus::Pending;
        self.updated_at = Utc::now();
    }

    pub fn reject(&mut self, category: Option<RejectionCategory>, feedback: Option<String>) {
        self.rejection_category = category;
        self.approval_status = ApprovalStatus::Rejected;
        self.approval_feedback = feedback;
        self.revision_count = self.revision_count.saturating_add(1);
        self.updated_at = Utc::now();
    }

    pub fn approve(&mut self) {
        self.approval_status = ApprovalStatus::Approved;
        self.updated_at = Utc::now();
    }

    /// Park the plan until a human decision lands in the store.
    pub fn await_human(&mut self) {
        self.approval_status = ApprovalStatus::PendingApproval;
        self.decided_by = None;
        self.decided_at = None;
        self.updated_at = Utc::now();
    }

    /// Record a human decision. Only a plan awaiting one accepts it; the
    /// revision counter is left to the engine's rejection handling.
    pub fn apply_decision(&mut self, decision: &PlanDecision) -> Result<(), PlanError> {
        if self.approval_status != ApprovalStatus::PendingApproval {
            return Err(PlanError::NotAwaitingDecision {
                plan_id: self.id,
                status: self.approval_status,
            });
        }
        let now = Utc::now();
        match decision {
            PlanDecision::Approve { feedback, decided_by } => {
                self.approval_status = ApprovalStatus::Approved;
                self.approval_feedback = feedback.clone();
                self.decided_by = decided_by.clone();
            }
            PlanDecision::Reject {
                category,
                reason,
                decided_by,
            } => {
                self.approval_status = ApprovalStatus::Rejected;
                self.rejection_category = *category;
                self.approval_feedback = Some(reason.clone());
                self.decided_by = decided_by.clone();
            }
        }
        self.decided_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn force_approve(&mut self) {
        self.approval_status = ApprovalStatus::ForceApproved;
        self.approval_feedback =
            Some("Force-approved after reaching MAX_STRATEGY_REVISIONS".to_string());
        self.updated_at = Utc::now();
    }
}

/// A decision written against a plan in `pending_approval`.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanDecision {
    Approve {
        feedback: Option<String>,
        decided_by: Option<String>,
    },
    Reject {
        category: Option<RejectionCategory>,
        reason: String,
        decided_by: Option<String>,
    },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PlanError {
    #[error("Plan {plan_id} is {} and not awaiting a decision", status.as_str())]
    NotAwaitingDecision { plan_id: PlanId, status: ApprovalStatus },
}
