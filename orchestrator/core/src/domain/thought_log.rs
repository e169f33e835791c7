// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Thought log: one entry per stage invocation, kept for observability and cost
//! accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::cost::{ModelTier, TokenUsage};
use crate::domain::cycle::{CycleId, CycleStage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtLogEntry {
    pub id: Uuid,
    pub cycle_id: CycleId,
    pub stage: CycleStage,
    pub agent_role: String,
    pub model_tier: ModelTier,
    pub input_summary: String,
    pub reasoning: Option<String>,
    pub decision: Option<String>,
    pub output_summary: String,
    pub tools_used: Vec<String>,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Aggregate of every thought-log entry for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleTokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub entries: u64,
}

impl CycleTokenUsage {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a ThoughtLogEntry>) -> Self {
        entries.into_iter().fold(Self::default(), |mut acc, entry| {
            acc.input_tokens = acc.input_tokens.saturating_add(entry.usage.input_tokens);
            acc.output_tokens = acc.output_tokens.saturating_add(entry.usage.output_tokens);
            acc.cost_usd += entry.cost_usd;
            acc.entries += 1;
            acc
        })
    }
}
