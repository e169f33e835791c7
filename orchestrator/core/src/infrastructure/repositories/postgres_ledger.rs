// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL `SpendLedger` over `monthly_spend`.
//!
//! `try_commit` locks the month's row (`SELECT ... FOR UPDATE`) inside a
//! transaction, so compare and commit happen as one step across processes.

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::domain::cost::exceeds_budget;
use crate::domain::repository::{LedgerCommit, RepositoryError, SpendLedger};

pub struct PostgresSpendLedger {
    pool: PgPool,
}

impl PostgresSpendLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SpendLedger for PostgresSpendLedger {
    async fn current(&self, month: &str) -> Result<f64, RepositoryError> {
        let total: Option<f64> = sqlx::query_scalar("SELECT total_usd FROM monthly_spend WHERE month = $1")
            .bind(month)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(total.unwrap_or(0.0))
    }

    async fn record(&self, month: &str, amount_usd: f64) -> Result<f64, RepositoryError> {
        sqlx::query_scalar(
            r#"
            INSERT INTO monthly_spend (month, total_usd, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (month) DO UPDATE SET
                total_usd = monthly_spend.total_usd + EXCLUDED.total_usd,
                updated_at = now()
            RETURNING total_usd
            "#,
        )
        .bind(month)
        .bind(amount_usd)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to record spend: {}", e)))
    }

    async fn try_commit(&self, month: &str, amount_usd: f64, limit_usd: f64) -> Result<LedgerCommit, RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        // Make sure the row exists so there is something to lock.
        sqlx::query("INSERT INTO monthly_spend (month, total_usd) VALUES ($1, 0) ON CONFLICT (month) DO NOTHING")
            .bind(month)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let current: f64 = sqlx::query_scalar("SELECT total_usd FROM monthly_spend WHERE month = $1 FOR UPDATE")
            .bind(month)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if exceeds_budget(current, amount_usd, limit_usd) {
            tx.rollback().await.map_err(|e| RepositoryError::Database(e.to_string()))?;
            return Ok(LedgerCommit::Rejected { current_usd: current });
        }

        let total: f64 = sqlx::query_scalar(
            "UPDATE monthly_spend SET total_usd = total_usd + $2, updated_at = now() WHERE month = $1 RETURNING total_usd",
        )
        .bind(month)
        .bind(amount_usd)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        tx.commit().await.map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(LedgerCommit::Committed { total_usd: total })
    }
}
