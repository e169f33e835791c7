// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL `PlanRepository` over the `plans` table.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::cycle::CycleId;
use crate::domain::plan::{ApprovalStatus, Plan, PlanDecision, PlanId};
use crate::domain::repository::{PlanRepository, RepositoryError};
use crate::domain::revision::RejectionCategory;

const PLAN_COLUMNS: &str = "id, cycle_id, content, revision_count, rejection_category, \
     approval_status, approval_feedback, quality_score, decided_by, decided_at, created_at, updated_at";

pub struct PostgresPlanRepository {
    pool: PgPool,
}

impl PostgresPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn plan_from_row(row: &PgRow) -> Result<Plan, RepositoryError> {
    let status_str: String = row.get("approval_status");
    let approval_status = ApprovalStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("Unknown approval status: {status_str}")))?;
    let category: Option<String> = row.get("rejection_category");
    let revision_count: i32 = row.get("revision_count");

    Ok(Plan {
        id: PlanId(row.get("id")),
        cycle_id: CycleId(row.get("cycle_id")),
        content: row.get("content"),
        revision_count: revision_count.max(0) as u32,
        rejection_category: category.as_deref().and_then(RejectionCategory::parse),
        approval_status,
        approval_feedback: row.get("approval_feedback"),
        quality_score: row.get("quality_score"),
        decided_by: row.get("decided_by"),
        decided_at: row.get("decided_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn save(&self, plan: &Plan) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO plans (
                id, cycle_id, content, revision_count, rejection_category,
                approval_status, approval_feedback, quality_score, decided_by, decided_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                content = EXCLUDED.content,
                revision_count = EXCLUDED.revision_count,
                rejection_category = EXCLUDED.rejection_category,
                approval_status = EXCLUDED.approval_status,
                approval_feedback = EXCLUDED.approval_feedback,
                quality_score = EXCLUDED.quality_score,
                decided_by = EXCLUDED.decided_by,
                decided_at = EXCLUDED.decided_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(plan.id.0)
        .bind(plan.cycle_id.0)
        .bind(&plan.content)
        .bind(plan.revision_count as i32)
        .bind(plan.rejection_category.map(|c| c.as_str()))
        .bind(plan.approval_status.as_str())
        .bind(&plan.approval_feedback)
        .bind(plan.quality_score)
        .bind(&plan.decided_by)
        .bind(plan.decided_at)
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save plan: {}", e)))?;

        Ok(())
    }

    async fn find_latest_for_cycle(&self, cycle_id: CycleId) -> Result<Option<Plan>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE cycle_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(cycle_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(plan_from_row).transpose()
    }

    async fn find_by_id(&self, id: PlanId) -> Result<Option<Plan>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(plan_from_row).transpose()
    }

    async fn find_awaiting_decision(&self) -> Result<Vec<Plan>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE approval_status = 'pending_approval' ORDER BY updated_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(plan_from_row).collect()
    }

    async fn record_decision(&self, id: PlanId, decision: &PlanDecision) -> Result<Plan, RepositoryError> {
        let (status, category, feedback, decided_by) = match decision {
            PlanDecision::Approve { feedback, decided_by } => {
                (ApprovalStatus::Approved, None, feedback.clone(), decided_by.clone())
            }
            PlanDecision::Reject {
                category,
                reason,
                decided_by,
            } => (ApprovalStatus::Rejected, *category, Some(reason.clone()), decided_by.clone()),
        };

        // Compare-and-set on the status so a decision and an expiry cannot both land.
        let row = sqlx::query(&format!(
            r#"
            UPDATE plans SET
                approval_status = $2,
                rejection_category = CASE WHEN $2 = 'rejected' THEN $3 ELSE rejection_category END,
                approval_feedback = $4,
                decided_by = $5,
                decided_at = now(),
                updated_at = now()
            WHERE id = $1 AND approval_status = 'pending_approval'
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(status.as_str())
        .bind(category.map(|c| c.as_str()))
        .bind(feedback)
        .bind(decided_by)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to record plan decision: {}", e)))?;

        match row {
            Some(row) => plan_from_row(&row),
            None => match self.find_by_id(id).await? {
                Some(plan) => Err(RepositoryError::Conflict(format!(
                    "plan {id} is {} and not awaiting a decision",
                    plan.approval_status.as_str()
                ))),
                None => Err(RepositoryError::NotFound(format!("plan {id}"))),
            },
        }
    }
}
