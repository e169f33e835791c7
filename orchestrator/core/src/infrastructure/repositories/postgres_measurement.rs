// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Measurement Repository
//!
//! Backs publications, `measurement_targets`, `metrics` and `analysis_queue`.
//!
//! A target only moves out of `pending` through a guarded
//! `UPDATE ... WHERE status = 'pending'`, and the metrics row is written in the
//! same transaction, so two collectors racing on one target produce exactly
//! one metrics row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::debug;

use crate::domain::measurement::{
    AnalysisKind, CollectedMetrics, MeasurementTarget, MeasurementWindow, Platform, PlatformSuspension, Publication,
    TargetId, TargetStatus,
};
use crate::domain::repository::{MeasurementRepository, RepositoryError};

const TARGET_COLUMNS: &str = "id, publication_id, content_id, account_id, platform, platform_post_id, \
     posted_at, measurement_window, due_at, status, collected_at, last_error";

pub struct PostgresMeasurementRepository {
    pool: PgPool,
}

impl PostgresMeasurementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_platform(value: &str) -> Result<Platform, RepositoryError> {
    Platform::parse(value).ok_or_else(|| RepositoryError::Serialization(format!("Unknown platform: {value}")))
}

fn target_from_row(row: &PgRow) -> Result<MeasurementTarget, RepositoryError> {
    let platform: String = row.get("platform");
    let window: String = row.get("measurement_window");
    let status: String = row.get("status");

    Ok(MeasurementTarget {
        id: TargetId(row.get("id")),
        publication_id: row.get("publication_id"),
        content_id: row.get("content_id"),
        account_id: row.get("account_id"),
        platform: parse_platform(&platform)?,
        platform_post_id: row.get("platform_post_id"),
        posted_at: row.get("posted_at"),
        window: MeasurementWindow::parse(&window)
            .ok_or_else(|| RepositoryError::Serialization(format!("Unknown window: {window}")))?,
        due_at: row.get("due_at"),
        status: TargetStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Serialization(format!("Unknown target status: {status}")))?,
        collected_at: row.get("collected_at"),
        last_error: row.get("last_error"),
    })
}

fn as_db_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl MeasurementRepository for PostgresMeasurementRepository {
    async fn record_publication(
        &self,
        publication: &Publication,
        targets: &[MeasurementTarget],
    ) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO publications (id, cycle_id, content_id, account_id, platform, platform_post_id, posted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(publication.id)
        .bind(publication.cycle_id.map(|c| c.0))
        .bind(&publication.content_id)
        .bind(&publication.account_id)
        .bind(publication.platform.as_str())
        .bind(&publication.platform_post_id)
        .bind(publication.posted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to record publication: {}", e)))?;

        if inserted.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!("publication {} already recorded", publication.id)));
        }

        for target in targets {
            sqlx::query(
                r#"
                INSERT INTO measurement_targets (
                    id, publication_id, content_id, account_id, platform, platform_post_id,
                    posted_at, measurement_window, due_at, status
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(target.id.0)
            .bind(target.publication_id)
            .bind(&target.content_id)
            .bind(&target.account_id)
            .bind(target.platform.as_str())
            .bind(&target.platform_post_id)
            .bind(target.posted_at)
            .bind(target.window.as_str())
            .bind(target.due_at)
            .bind(target.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to schedule target: {}", e)))?;
        }

        tx.commit().await.map_err(|e| RepositoryError::Database(e.to_string()))?;
        debug!(publication_id = %publication.id, targets = targets.len(), "Recorded publication");
        Ok(())
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        platform: Option<Platform>,
    ) -> Result<Vec<MeasurementTarget>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TARGET_COLUMNS} FROM measurement_targets
            WHERE status = 'pending' AND due_at <= $1 AND ($2::text IS NULL OR platform = $2)
            ORDER BY due_at ASC
            LIMIT $3
            "#
        ))
        .bind(now)
        .bind(platform.map(|p| p.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(target_from_row).collect()
    }

    async fn find_by_id(&self, id: TargetId) -> Result<Option<MeasurementTarget>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TARGET_COLUMNS} FROM measurement_targets WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(target_from_row).transpose()
    }

    async fn save_metrics(&self, id: TargetId, metrics: &CollectedMetrics) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let claimed = sqlx::query(
            r#"
            UPDATE measurement_targets
            SET status = 'collected', collected_at = $2, last_error = NULL
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.0)
        .bind(metrics.collected_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if claimed.rows_affected() == 0 {
            let exists: Option<String> = sqlx::query_scalar("SELECT status FROM measurement_targets WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
            return Err(match exists {
                Some(status) => RepositoryError::Conflict(format!("target {id} is {status}")),
                None => RepositoryError::NotFound(format!("target {id}")),
            });
        }

        let m = &metrics.metrics;
        sqlx::query(
            r#"
            INSERT INTO metrics (
                target_id, views, likes, comments, shares, saves, watch_time_seconds, completion_rate,
                impressions, reach, follower_delta, engagement_rate, raw, collected_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(id.0)
        .bind(as_db_count(m.views))
        .bind(as_db_count(m.likes))
        .bind(as_db_count(m.comments))
        .bind(as_db_count(m.shares))
        .bind(m.saves.map(as_db_count))
        .bind(m.watch_time_seconds)
        .bind(m.completion_rate)
        .bind(m.impressions.map(as_db_count))
        .bind(m.reach.map(as_db_count))
        .bind(m.follower_delta)
        .bind(metrics.engagement_rate)
        .bind(&m.raw)
        .bind(metrics.collected_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to store metrics: {}", e)))?;

        tx.commit().await.map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn record_error(&self, id: TargetId, error: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE measurement_targets SET last_error = $2 WHERE id = $1")
            .bind(id.0)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("target {id}")));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: TargetId, error: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE measurement_targets SET status = 'failed', last_error = $2 WHERE id = $1",
        )
        .bind(id.0)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("target {id}")));
        }
        Ok(())
    }

    async fn queue_analysis(
        &self,
        content_id: &str,
        kind: AnalysisKind,
        window: MeasurementWindow,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO analysis_queue (content_id, analysis_kind, measurement_window) VALUES ($1, $2, $3)",
        )
        .bind(content_id)
        .bind(kind.as_str())
        .bind(window.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to queue analysis: {}", e)))?;

        Ok(())
    }

    async fn last_posted_at(
        &self,
        account_id: &str,
        platform: Platform,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        sqlx::query_scalar("SELECT MAX(posted_at) FROM publications WHERE account_id = $1 AND platform = $2")
            .bind(account_id)
            .bind(platform.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))
    }

    async fn known_accounts(&self) -> Result<Vec<(String, Platform)>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT DISTINCT account_id, platform FROM publications ORDER BY account_id, platform",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let platform: String = row.get("platform");
                Ok((row.get("account_id"), parse_platform(&platform)?))
            })
            .collect()
    }

    async fn suspend_platform(&self, platform: Platform, reason: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO platform_suspensions (platform, reason) VALUES ($1, $2) ON CONFLICT (platform) DO NOTHING",
        )
        .bind(platform.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn resume_platform(&self, platform: Platform) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM platform_suspensions WHERE platform = $1")
            .bind(platform.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_suspension(&self, platform: Platform) -> Result<Option<PlatformSuspension>, RepositoryError> {
        let row = sqlx::query("SELECT platform, reason, suspended_at FROM platform_suspensions WHERE platform = $1")
            .bind(platform.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        row.as_ref().map(row_to_suspension).transpose()
    }

    async fn list_suspensions(&self) -> Result<Vec<PlatformSuspension>, RepositoryError> {
        let rows = sqlx::query("SELECT platform, reason, suspended_at FROM platform_suspensions ORDER BY platform")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        rows.iter().map(row_to_suspension).collect()
    }
}

fn row_to_suspension(row: &PgRow) -> Result<PlatformSuspension, RepositoryError> {
    let platform: String = row.get("platform");
    Ok(PlatformSuspension {
        platform: parse_platform(&platform)?,
        reason: row.get("reason"),
        suspended_at: row.get("suspended_at"),
    })
}
