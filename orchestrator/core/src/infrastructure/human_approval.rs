// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Human Approval Gate - human-in-the-loop sign-off for cycle plans
//!
//! When `STRATEGY_APPROVAL_REQUIRED` is on, an AI-approved plan is parked in
//! the store as `pending_approval`. The decision is written into the plan row
//! by whoever holds the operator surface (the dashboard, `reelforge approval`),
//! and the gate polls that row until it changes or the request times out.
//! Expiry is itself written as a `plan_revision` rejection, compare-and-set on
//! the status, so a decision landing at the deadline is never lost.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::plan::{ApprovalStatus, Plan, PlanDecision, PlanId};
use crate::domain::repository::{PlanRepository, RepositoryError};
use crate::domain::revision::{is_valid_rejection_category, RejectionCategory};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

const TIMEOUT_REASON: &str = "human approval timed out";

#[derive(Debug, Clone, PartialEq)]
pub enum HumanDecision {
    Approved {
        feedback: Option<String>,
        decided_by: Option<String>,
        decided_at: DateTime<Utc>,
    },
    Rejected {
        category: Option<RejectionCategory>,
        reason: String,
        decided_by: Option<String>,
        decided_at: DateTime<Utc>,
    },
    TimedOut {
        timeout_at: DateTime<Utc>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Plan {0} not found")]
    NotFound(PlanId),

    #[error("Plan {0} is not awaiting a decision")]
    NotPending(PlanId),

    #[error("Unknown rejection category: {0}")]
    InvalidCategory(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct HumanApprovalGate {
    plans: Arc<dyn PlanRepository>,
    poll_interval: Duration,
}

impl HumanApprovalGate {
    pub fn new(plans: Arc<dyn PlanRepository>) -> Self {
        Self {
            plans,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Park `plan` until a human decides or `timeout` elapses.
    pub async fn request_approval(
        &self,
        plan: &Plan,
        summary: &str,
        timeout: Duration,
    ) -> Result<HumanDecision, RepositoryError> {
        let mut parked = plan.clone();
        parked.await_human();
        self.plans.save(&parked).await?;

        info!(
            cycle_id = %plan.cycle_id,
            plan_id = %plan.id,
            summary,
            timeout_seconds = timeout.as_secs(),
            "Human approval requested"
        );

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(decision) = self.read_decision(plan.id).await? {
                return Ok(decision);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(self.poll_interval)).await;
        }

        let expiry = PlanDecision::Reject {
            category: Some(RejectionCategory::PlanRevision),
            reason: TIMEOUT_REASON.to_string(),
            decided_by: None,
        };
        match self.plans.record_decision(plan.id, &expiry).await {
            Ok(_) => {
                warn!(plan_id = %plan.id, "Human approval request timed out");
                Ok(HumanDecision::TimedOut { timeout_at: Utc::now() })
            }
            // Decided between the last poll and the expiry write.
            Err(RepositoryError::Conflict(_)) => self.read_decision(plan.id).await?.ok_or_else(|| {
                RepositoryError::Conflict(format!("plan {} left pending_approval without a decision", plan.id))
            }),
            Err(e) => Err(e),
        }
    }

    async fn read_decision(&self, plan_id: PlanId) -> Result<Option<HumanDecision>, RepositoryError> {
        let plan = self
            .plans
            .find_by_id(plan_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("plan {plan_id}")))?;
        let decided_at = plan.decided_at.unwrap_or(plan.updated_at);

        match plan.approval_status {
            ApprovalStatus::PendingApproval => Ok(None),
            ApprovalStatus::Approved | ApprovalStatus::ForceApproved => Ok(Some(HumanDecision::Approved {
                feedback: plan.approval_feedback,
                decided_by: plan.decided_by,
                decided_at,
            })),
            ApprovalStatus::Rejected => Ok(Some(HumanDecision::Rejected {
                category: plan.rejection_category,
                reason: plan.approval_feedback.unwrap_or_default(),
                decided_by: plan.decided_by,
                decided_at,
            })),
            ApprovalStatus::Pending => Err(RepositoryError::Conflict(format!(
                "plan {plan_id} was reset to pending while awaiting a decision"
            ))),
        }
    }

    pub async fn submit_approval(
        &self,
        plan_id: PlanId,
        feedback: Option<String>,
        decided_by: Option<String>,
    ) -> Result<Plan, ApprovalError> {
        let plan = self
            .decide(plan_id, &PlanDecision::Approve { feedback, decided_by })
            .await?;
        info!(plan_id = %plan_id, decided_by = ?plan.decided_by, "Plan approved by operator");
        Ok(plan)
    }

    /// Reject with an externally supplied category. Unknown categories are
    /// refused and the plan stays pending.
    pub async fn submit_rejection(
        &self,
        plan_id: PlanId,
        category: Option<&str>,
        reason: String,
        decided_by: Option<String>,
    ) -> Result<Plan, ApprovalError> {
        let category = match category {
            Some(raw) if !is_valid_rejection_category(raw) => {
                return Err(ApprovalError::InvalidCategory(raw.to_string()))
            }
            Some(raw) => RejectionCategory::parse(raw),
            None => None,
        };

        let plan = self
            .decide(
                plan_id,
                &PlanDecision::Reject {
                    category,
                    reason,
                    decided_by,
                },
            )
            .await?;
        info!(
            plan_id = %plan_id,
            decided_by = ?plan.decided_by,
            category = ?category,
            "Plan rejected by operator"
        );
        Ok(plan)
    }

    pub async fn list_pending(&self) -> Result<Vec<Plan>, ApprovalError> {
        Ok(self.plans.find_awaiting_decision().await?)
    }

    async fn decide(&self, plan_id: PlanId, decision: &PlanDecision) -> Result<Plan, ApprovalError> {
        match self.plans.record_decision(plan_id, decision).await {
            Ok(plan) => Ok(plan),
            Err(RepositoryError::NotFound(_)) => Err(ApprovalError::NotFound(plan_id)),
            Err(RepositoryError::Conflict(reason)) => {
                debug!(plan_id = %plan_id, reason, "Decision refused");
                Err(ApprovalError::NotPending(plan_id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cycle::CycleId;
    use crate::infrastructure::repositories::InMemoryPlanRepository;

    fn gate() -> (Arc<InMemoryPlanRepository>, Arc<HumanApprovalGate>) {
        let plans = Arc::new(InMemoryPlanRepository::new());
        let gate = HumanApprovalGate::new(plans.clone()).with_poll_interval(Duration::from_millis(10));
        (plans, Arc::new(gate))
    }

    async fn first_pending(gate: &HumanApprovalGate) -> Plan {
        loop {
            if let Some(plan) = gate.list_pending().await.unwrap().into_iter().next() {
                return plan;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_approval_flow() {
        let (_, gate) = gate();
        let approver = gate.clone();
        tokio::spawn(async move {
            let plan = first_pending(&approver).await;
            approver
                .submit_approval(plan.id, Some("ship it".into()), Some("alice".into()))
                .await
                .unwrap();
        });

        let plan = Plan::new(CycleId(1), serde_json::json!({}));
        let decision = gate
            .request_approval(&plan, "3 shorts", Duration::from_secs(30))
            .await
            .unwrap();
        match decision {
            HumanDecision::Approved { feedback, decided_by, .. } => {
                assert_eq!(feedback.as_deref(), Some("ship it"));
                assert_eq!(decided_by.as_deref(), Some("alice"));
            }
            other => panic!("Expected approval, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_carries_category() {
        let (_, gate) = gate();
        let reviewer = gate.clone();
        tokio::spawn(async move {
            let plan = first_pending(&reviewer).await;
            assert!(matches!(
                reviewer
                    .submit_rejection(plan.id, Some("not_a_category"), "no".into(), None)
                    .await,
                Err(ApprovalError::InvalidCategory(_))
            ));
            reviewer
                .submit_rejection(plan.id, Some("data_insufficient"), "need more intel".into(), None)
                .await
                .unwrap();
        });

        let plan = Plan::new(CycleId(2), serde_json::json!({}));
        let decision = gate.request_approval(&plan, "plan", Duration::from_secs(30)).await.unwrap();
        assert!(matches!(
            decision,
            HumanDecision::Rejected {
                category: Some(RejectionCategory::DataInsufficient),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decision_written_straight_into_the_store() {
        let (plans, gate) = gate();
        let writer = plans.clone();
        tokio::spawn(async move {
            loop {
                let parked = writer.find_awaiting_decision().await.unwrap();
                if let Some(plan) = parked.first() {
                    let decision = PlanDecision::Approve {
                        feedback: None,
                        decided_by: Some("dashboard".into()),
                    };
                    writer.record_decision(plan.id, &decision).await.unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let plan = Plan::new(CycleId(4), serde_json::json!({}));
        let decision = gate.request_approval(&plan, "plan", Duration::from_secs(60)).await.unwrap();
        assert!(matches!(decision, HumanDecision::Approved { decided_by: Some(ref who), .. } if who == "dashboard"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_recorded_as_plan_revision() {
        let (plans, gate) = gate();
        let plan = Plan::new(CycleId(3), serde_json::json!({}));
        let decision = gate.request_approval(&plan, "plan", Duration::from_secs(3600)).await.unwrap();
        assert!(matches!(decision, HumanDecision::TimedOut { .. }));
        assert!(gate.list_pending().await.unwrap().is_empty());

        let stored = plans.find_by_id(plan.id).await.unwrap().unwrap();
        assert_eq!(stored.approval_status, ApprovalStatus::Rejected);
        assert_eq!(stored.rejection_category, Some(RejectionCategory::PlanRevision));

        // Too late for the operator.
        assert!(matches!(
            gate.submit_approval(plan.id, None, None).await,
            Err(ApprovalError::NotPending(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_plan() {
        let (_, gate) = gate();
        let id = PlanId::new();
        assert!(matches!(
            gate.submit_approval(id, None, None).await,
            Err(ApprovalError::NotFound(found)) if found == id
        ));
    }
}
