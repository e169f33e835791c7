// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Learning Repository
//!
//! Learnings live in `learnings`; promoted copies in `global_learnings`.
//! Deactivation is a single `UPDATE ... RETURNING` so a concurrent confidence
//! update can never be half-applied to the sweep result.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::debug;

use crate::domain::learning::{Confidence, GlobalLearning, Learning, LearningId, LearningStatus};
use crate::domain::repository::{LearningRepository, RepositoryError};

const LEARNING_COLUMNS: &str = "id, agent_role, category, content, context, confidence, times_applied, \
     times_successful, is_active, promoted_to, created_at, updated_at, last_applied_at";

pub struct PostgresLearningRepository {
    pool: PgPool,
}

impl PostgresLearningRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn learning_from_row(row: &PgRow) -> Learning {
    let is_active: bool = row.get("is_active");
    let times_applied: i32 = row.get("times_applied");
    let times_successful: i32 = row.get("times_successful");

    Learning {
        id: LearningId(row.get("id")),
        agent_role: row.get("agent_role"),
        category: row.get("category"),
        content: row.get("content"),
        context: row.get("context"),
        confidence: Confidence::new(row.get("confidence")),
        times_applied: times_applied.max(0) as u32,
        times_successful: times_successful.max(0) as u32,
        status: if is_active {
            LearningStatus::Active
        } else {
            LearningStatus::Inactive
        },
        promoted_to: row.get("promoted_to"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_applied_at: row.get("last_applied_at"),
    }
}

#[async_trait]
impl LearningRepository for PostgresLearningRepository {
    async fn save(&self, learning: &Learning) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO learnings (
                id, agent_role, category, content, context, confidence, times_applied,
                times_successful, is_active, promoted_to, created_at, updated_at, last_applied_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                confidence = EXCLUDED.confidence,
                times_applied = EXCLUDED.times_applied,
                times_successful = EXCLUDED.times_successful,
                updated_at = EXCLUDED.updated_at,
                last_applied_at = EXCLUDED.last_applied_at
            "#,
        )
        .bind(learning.id.0)
        .bind(&learning.agent_role)
        .bind(&learning.category)
        .bind(&learning.content)
        .bind(&learning.context)
        .bind(learning.confidence.value())
        .bind(learning.times_applied as i32)
        .bind(learning.times_successful as i32)
        .bind(learning.is_active())
        .bind(learning.promoted_to)
        .bind(learning.created_at)
        .bind(learning.updated_at)
        .bind(learning.last_applied_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save learning: {}", e)))?;

        Ok(())
    }

    async fn record_feedback(&self, learning: &Learning) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE learnings
            SET confidence = $2, times_applied = $3, times_successful = $4, updated_at = $5, last_applied_at = $6
            WHERE id = $1 AND is_active
            "#,
        )
        .bind(learning.id.0)
        .bind(learning.confidence.value())
        .bind(learning.times_applied as i32)
        .bind(learning.times_successful as i32)
        .bind(learning.updated_at)
        .bind(learning.last_applied_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to record learning feedback: {}", e)))?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(learning.id).await? {
                Some(_) => Err(RepositoryError::Conflict(format!("learning {} is inactive", learning.id))),
                None => Err(RepositoryError::NotFound(format!("learning {}", learning.id))),
            };
        }
        Ok(())
    }

    async fn find_by_id(&self, id: LearningId) -> Result<Option<Learning>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LEARNING_COLUMNS} FROM learnings WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(row.as_ref().map(learning_from_row))
    }

    async fn find_active(&self, agent_role: Option<&str>) -> Result<Vec<Learning>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LEARNING_COLUMNS} FROM learnings
            WHERE is_active AND ($1::text IS NULL OR agent_role = $1)
            ORDER BY confidence DESC
            "#
        ))
        .bind(agent_role)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(rows.iter().map(learning_from_row).collect())
    }

    async fn deactivate_below(
        &self,
        threshold: f64,
        agent_role: Option<&str>,
    ) -> Result<Vec<LearningId>, RepositoryError> {
        let ids: Vec<uuid::Uuid> = sqlx::query_scalar(
            r#"
            UPDATE learnings SET is_active = FALSE, updated_at = now()
            WHERE is_active AND confidence < $1 AND ($2::text IS NULL OR agent_role = $2)
            RETURNING id
            "#,
        )
        .bind(threshold)
        .bind(agent_role)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to deactivate learnings: {}", e)))?;

        Ok(ids.into_iter().map(LearningId).collect())
    }

    async fn promote(&self, source: LearningId, global: &GlobalLearning) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let linked = sqlx::query(
            "UPDATE learnings SET promoted_to = $2, updated_at = now() WHERE id = $1 AND promoted_to IS NULL",
        )
        .bind(source.0)
        .bind(global.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if linked.rows_affected() == 0 {
            debug!(learning_id = %source, "Learning missing or already promoted");
            return Err(RepositoryError::Conflict(format!("learning {source} already promoted")));
        }

        sqlx::query(
            r#"
            INSERT INTO global_learnings (id, source_learning_id, category, content, confidence, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(global.id)
        .bind(global.source_learning_id.0)
        .bind(&global.category)
        .bind(&global.content)
        .bind(global.confidence)
        .bind(global.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to insert global learning: {}", e)))?;

        tx.commit().await.map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }
}
