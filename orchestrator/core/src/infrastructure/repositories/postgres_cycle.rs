// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Cycle Repository
//!
//! Production `CycleRepository` backed by the `cycles` table. Updates carry a
//! `status NOT IN ('completed', 'failed')` guard so a row an operator has
//! cancelled can never be overwritten by an engine holding a stale copy.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::cycle::{Cycle, CycleId, CycleStage, CycleStatus};
use crate::domain::repository::{CycleRepository, RepositoryError};

const CYCLE_COLUMNS: &str =
    "id, cycle_number, status, current_stage, started_at, ended_at, summary, failure_reason";

pub struct PostgresCycleRepository {
    pool: PgPool,
}

impl PostgresCycleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn cycle_from_row(row: &PgRow) -> Result<Cycle, RepositoryError> {
    let status_str: String = row.get("status");
    let status = CycleStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("Unknown cycle status: {status_str}")))?;
    let current_stage: Option<String> = row.get("current_stage");

    Ok(Cycle {
        id: CycleId(row.get("id")),
        cycle_number: row.get("cycle_number"),
        status,
        current_stage: current_stage.as_deref().and_then(CycleStage::parse),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        summary: row.get("summary"),
        failure_reason: row.get("failure_reason"),
    })
}

#[async_trait]
impl CycleRepository for PostgresCycleRepository {
    async fn create(&self) -> Result<Cycle, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO cycles (cycle_number, status, summary)
            VALUES ((SELECT COALESCE(MAX(cycle_number), 0) + 1 FROM cycles), 'planning', '{{}}'::jsonb)
            RETURNING {CYCLE_COLUMNS}
            "#
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to create cycle: {}", e)))?;

        cycle_from_row(&row)
    }

    async fn save(&self, cycle: &Cycle) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE cycles SET
                status = $2,
                current_stage = $3,
                ended_at = $4,
                summary = $5,
                failure_reason = $6
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(cycle.id.0)
        .bind(cycle.status.as_str())
        .bind(cycle.current_stage.map(|s| s.as_str()))
        .bind(cycle.ended_at)
        .bind(&cycle.summary)
        .bind(&cycle.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save cycle: {}", e)))?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let existing: Option<String> = sqlx::query_scalar("SELECT status FROM cycles WHERE id = $1")
            .bind(cycle.id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        match existing {
            Some(status) => Err(RepositoryError::Conflict(format!("cycle {} is already {}", cycle.id, status))),
            None => Err(RepositoryError::NotFound(format!("cycle {}", cycle.id))),
        }
    }

    async fn find_by_id(&self, id: CycleId) -> Result<Option<Cycle>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CYCLE_COLUMNS} FROM cycles WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(cycle_from_row).transpose()
    }

    async fn find_by_status(&self, status: CycleStatus) -> Result<Vec<Cycle>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CYCLE_COLUMNS} FROM cycles WHERE status = $1 ORDER BY id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(cycle_from_row).collect()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Cycle>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CYCLE_COLUMNS} FROM cycles ORDER BY id DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(cycle_from_row).collect()
    }
}
