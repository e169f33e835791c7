// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL `ThoughtLogRepository` over `agent_thought_logs`.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::cost::{ModelTier, TokenUsage};
use crate::domain::cycle::{CycleId, CycleStage};
use crate::domain::repository::{RepositoryError, ThoughtLogRepository};
use crate::domain::thought_log::{CycleTokenUsage, ThoughtLogEntry};

pub struct PostgresThoughtLogRepository {
    pool: PgPool,
}

impl PostgresThoughtLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &PgRow) -> Result<ThoughtLogEntry, RepositoryError> {
    let stage_str: String = row.get("stage");
    let stage = CycleStage::parse(&stage_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("Unknown stage: {stage_str}")))?;
    let tier_str: String = row.get("model_tier");
    let model_tier: ModelTier = serde_json::from_value(serde_json::Value::String(tier_str))?;
    let tools_used: serde_json::Value = row.get("tools_used");
    let input_tokens: i64 = row.get("input_tokens");
    let output_tokens: i64 = row.get("output_tokens");
    let duration_ms: i64 = row.get("duration_ms");

    Ok(ThoughtLogEntry {
        id: row.get("id"),
        cycle_id: CycleId(row.get("cycle_id")),
        stage,
        agent_role: row.get("agent_role"),
        model_tier,
        input_summary: row.get("input_summary"),
        reasoning: row.get("reasoning"),
        decision: row.get("decision"),
        output_summary: row.get("output_summary"),
        tools_used: serde_json::from_value(tools_used)?,
        usage: TokenUsage::new(input_tokens.max(0) as u64, output_tokens.max(0) as u64),
        cost_usd: row.get("cost_usd"),
        duration_ms: duration_ms.max(0) as u64,
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl ThoughtLogRepository for PostgresThoughtLogRepository {
    async fn record(&self, entry: &ThoughtLogEntry) -> Result<(), RepositoryError> {
        let tools_used = serde_json::to_value(&entry.tools_used)?;

        sqlx::query(
            r#"
            INSERT INTO agent_thought_logs (
                id, cycle_id, stage, agent_role, model_tier, input_summary, reasoning, decision,
                output_summary, tools_used, input_tokens, output_tokens, cost_usd, duration_ms, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(entry.id)
        .bind(entry.cycle_id.0)
        .bind(entry.stage.as_str())
        .bind(&entry.agent_role)
        .bind(entry.model_tier.as_str())
        .bind(&entry.input_summary)
        .bind(&entry.reasoning)
        .bind(&entry.decision)
        .bind(&entry.output_summary)
        .bind(tools_used)
        .bind(entry.usage.input_tokens as i64)
        .bind(entry.usage.output_tokens as i64)
        .bind(entry.cost_usd)
        .bind(entry.duration_ms as i64)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to record thought log: {}", e)))?;

        Ok(())
    }

    async fn list_for_cycle(&self, cycle_id: CycleId) -> Result<Vec<ThoughtLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, cycle_id, stage, agent_role, model_tier, input_summary, reasoning, decision,
                   output_summary, tools_used, input_tokens, output_tokens, cost_usd, duration_ms, created_at
            FROM agent_thought_logs
            WHERE cycle_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(cycle_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn cycle_token_usage(&self, cycle_id: CycleId) -> Result<CycleTokenUsage, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(input_tokens), 0)::BIGINT AS input_tokens,
                   COALESCE(SUM(output_tokens), 0)::BIGINT AS output_tokens,
                   COALESCE(SUM(cost_usd), 0)::DOUBLE PRECISION AS cost_usd,
                   COUNT(*) AS entries
            FROM agent_thought_logs
            WHERE cycle_id = $1
            "#,
        )
        .bind(cycle_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let input_tokens: i64 = row.get("input_tokens");
        let output_tokens: i64 = row.get("output_tokens");
        let entries: i64 = row.get("entries");
        Ok(CycleTokenUsage {
            input_tokens: input_tokens.max(0) as u64,
            output_tokens: output_tokens.max(0) as u64,
            cost_usd: row.get("cost_usd"),
            entries: entries.max(0) as u64,
        })
    }
}
