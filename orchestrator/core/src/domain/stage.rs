// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Stage Executor Contract
//!
//! Each cycle node is an opaque unit of work (typically a call into an external
//! reasoning service) behind [`StageExecutor`]. The engine hands it a
//! [`StageContext`] and receives a structured [`StageOutput`]; the executor
//! never decides control flow.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Polymorphic port for the nine cycle nodes
//! - **Implementations:** `HttpStageExecutor` (infrastructure), scripted
//!   executors in tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::cost::{ModelTier, TokenUsage};
use crate::domain::cycle::{CycleId, CycleStage};
use crate::domain::learning::{LearningFeedback, LearningId, NewLearning};
use crate::domain::measurement::{Platform, Publication};
use crate::domain::plan::Plan;
use crate::domain::quality::QualityScores;
use crate::domain::revision::RejectionCategory;

/// Active learning as exposed to a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningBrief {
    pub id: LearningId,
    pub category: String,
    pub content: String,
    pub confidence: f64,
}

/// Why the cycle came back to this stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionNote {
    pub category: Option<RejectionCategory>,
    pub explanation: String,
    pub feedback: Option<String>,
    pub revision_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformAvailability {
    pub account_id: String,
    pub platform: Platform,
    pub can_post: bool,
    pub remaining_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageContext {
    pub cycle_id: CycleId,
    pub cycle_number: i64,
    pub stage: CycleStage,
    pub model_tier: ModelTier,
    pub learnings: Vec<LearningBrief>,
    pub plan: Option<Plan>,
    pub revision: Option<RevisionNote>,
    /// Payloads of stages already completed in this cycle, keyed by stage name.
    pub previous: HashMap<String, serde_json::Value>,
    pub platform_availability: Vec<PlatformAvailability>,
}

/// Decision reported by `approve_plan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalVerdict {
    pub approved: bool,
    /// Raw category; validated before it is trusted for routing.
    #[serde(default)]
    pub rejection_category: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOutput {
    pub summary: String,
    pub reasoning: Option<String>,
    pub decision: Option<String>,
    pub payload: serde_json::Value,
    pub usage: TokenUsage,
    pub tools_used: Vec<String>,
    pub verdict: Option<ApprovalVerdict>,
    pub quality: Option<QualityScores>,
    pub publications: Vec<Publication>,
    pub learning_feedback: Vec<LearningFeedback>,
    pub new_learnings: Vec<NewLearning>,
    /// Overrides `PRODUCTION_COST_ESTIMATE_USD` for the budget gate.
    pub estimated_production_cost_usd: Option<f64>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum StageError {
    /// Malformed input; never retried.
    #[error("Stage input invalid: {0}")]
    Validation(String),

    /// Worth retrying at the call boundary.
    #[error("Transient stage failure: {0}")]
    Transient(String),

    /// The reasoning service is unusable; the cycle fails.
    #[error("Unrecoverable stage failure: {0}")]
    Unrecoverable(String),
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError>;
}

/// One executor per cycle node.
#[derive(Clone, Default)]
pub struct StageRegistry {
    executors: HashMap<CycleStage, Arc<dyn StageExecutor>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: CycleStage, executor: Arc<dyn StageExecutor>) {
        self.executors.insert(stage, executor);
    }

    pub fn with(mut self, stage: CycleStage, executor: Arc<dyn StageExecutor>) -> Self {
        self.register(stage, executor);
        self
    }

    pub fn get(&self, stage: CycleStage) -> Result<Arc<dyn StageExecutor>, StageError> {
        self.executors
            .get(&stage)
            .cloned()
            .ok_or_else(|| StageError::Unrecoverable(format!("no executor registered for {stage}")))
    }

    pub fn missing(&self) -> Vec<CycleStage> {
        CycleStage::ALL
            .into_iter()
            .filter(|s| !self.executors.contains_key(s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl StageExecutor for Noop {
        async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
            Ok(StageOutput::default())
        }
    }

    #[test]
    fn test_registry_reports_missing_stages() {
        let registry = StageRegistry::new().with(CycleStage::SetStrategy, Arc::new(Noop));
        assert!(registry.get(CycleStage::SetStrategy).is_ok());
        assert!(matches!(
            registry.get(CycleStage::Reflect),
            Err(StageError::Unrecoverable(_))
        ));
        assert_eq!(registry.missing().len(), 8);
    }

    #[test]
    fn test_output_tolerates_sparse_json() {
        let output: StageOutput = serde_json::from_str(
            r#"{"summary":"ok","verdict":{"approved":false,"rejection_category":"hypothesis_weak"}}"#,
        )
        .unwrap();
        assert_eq!(output.summary, "ok");
        assert_eq!(output.usage, TokenUsage::default());
        let verdict = output.verdict.unwrap();
        assert!(!verdict.approved);
        assert_eq!(verdict.rejection_category.as_deref(), Some("hypothesis_weak"));
    }
}
