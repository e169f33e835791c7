// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cycle Aggregate
//!
//! A [`Cycle`] is one pass through the content pipeline. Cycles are append-only
//! history: they are created by the engine, mutated only by the engine (or an
//! operator cancelling them), and never deleted.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Aggregate Root:** Cycle
//!
//! ## State Transitions
//!
//! ```text
//! planning ──▶ producing ──▶ measuring ──▶ completed
//!    │             │   ▲          │
//!    │             ▼   │          │
//!    │          deferred          │
//!    └─────────────┴──────────────┴──▶ failed
//! ```
//!
//! `completed` and `failed` are terminal: every mutator on a terminal cycle
//! returns [`CycleError::Terminal`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sequence id assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(pub i64);

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Planning,
    Producing,
    Measuring,
    /// Blocked by the budget gate; resumable.
    Deferred,
    Completed,
    Failed,
}

impl CycleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleStatus::Completed | CycleStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Planning => "planning",
            CycleStatus::Producing => "producing",
            CycleStatus::Measuring => "measuring",
            CycleStatus::Deferred => "deferred",
            CycleStatus::Completed => "completed",
            CycleStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "planning" => Some(CycleStatus::Planning),
            "producing" => Some(CycleStatus::Producing),
            "measuring" => Some(CycleStatus::Measuring),
            "deferred" => Some(CycleStatus::Deferred),
            "completed" => Some(CycleStatus::Completed),
            "failed" => Some(CycleStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named node of the cycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    SetStrategy,
    CollectIntel,
    AnalyzeCycle,
    PlanContent,
    ApprovePlan,
    Produce,
    Post,
    Measure,
    Reflect,
}

impl CycleStage {
    /// Graph order on the happy path.
    pub const ALL: [CycleStage; 9] = [
        CycleStage::SetStrategy,
        CycleStage::CollectIntel,
        CycleStage::AnalyzeCycle,
        CycleStage::PlanContent,
        CycleStage::ApprovePlan,
        CycleStage::Produce,
        CycleStage::Post,
        CycleStage::Measure,
        CycleStage::Reflect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStage::SetStrategy => "set_strategy",
            CycleStage::CollectIntel => "collect_intel",
            CycleStage::AnalyzeCycle => "analyze_cycle",
            CycleStage::PlanContent => "plan_content",
            CycleStage::ApprovePlan => "approve_plan",
            CycleStage::Produce => "produce",
            CycleStage::Post => "post",
            CycleStage::Measure => "measure",
            CycleStage::Reflect => "reflect",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Cycle status while this stage runs.
    pub fn status(&self) -> CycleStatus {
        match self {
            CycleStage::SetStrategy
            | CycleStage::CollectIntel
            | CycleStage::AnalyzeCycle
            | CycleStage::PlanContent
            | CycleStage::ApprovePlan => CycleStatus::Planning,
            CycleStage::Produce | CycleStage::Post => CycleStatus::Producing,
            CycleStage::Measure | CycleStage::Reflect => CycleStatus::Measuring,
        }
    }

    /// Agent role whose learnings are loaded into this stage's context.
    pub fn agent_role(&self) -> &'static str {
        match self {
            CycleStage::SetStrategy | CycleStage::ApprovePlan => "strategist",
            CycleStage::CollectIntel => "researcher",
            CycleStage::AnalyzeCycle | CycleStage::Measure | CycleStage::Reflect => "analyst",
            CycleStage::PlanContent => "planner",
            CycleStage::Produce => "producer",
            CycleStage::Post => "publisher",
        }
    }
}

impl std::fmt::Display for CycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub id: CycleId,
    /// Human-facing sequence number, unique and starting at 1.
    pub cycle_number: i64,
    pub status: CycleStatus,
    pub current_stage: Option<CycleStage>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: serde_json::Value,
    pub failure_reason: Option<String>,
}

impl Cycle {
    pub fn new(id: CycleId, cycle_number: i64) -> Self {
        Self {
            id,
            cycle_number,
            status: CycleStatus::Planning,
            current_stage: None,
            started_at: Utc::now(),
            ended_at: None,
            summary: serde_json::Value::Object(serde_json::Map::new()),
            failure_reason: None,
        }
    }

    fn ensure_mutable(&self) -> Result<(), CycleError> {
        if self.status.is_terminal() {
            return Err(CycleError::Terminal {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn enter_stage(&mut self, stage: CycleStage) -> Result<(), CycleError> {
        self.ensure_mutable()?;
        self.current_stage = Some(stage);
        self.status = stage.status();
        Ok(())
    }

    pub fn defer(&mut self, reason: impl Into<String>) -> Result<(), CycleError> {
        self.ensure_mutable()?;
        self.status = CycleStatus::Deferred;
        self.set_summary_field("deferred_reason", serde_json::Value::String(reason.into()));
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), CycleError> {
        self.ensure_mutable()?;
        self.status = CycleStatus::Completed;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), CycleError> {
        self.ensure_mutable()?;
        self.status = CycleStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    pub fn set_summary_field(&mut self, key: &str, value: serde_json::Value) {
        if !self.summary.is_object() {
            self.summary = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.summary.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CycleError {
    #[error("Cycle {id} is {status} and can no longer change")]
    Terminal { id: CycleId, status: CycleStatus },

    #[error("Cycle {id} is {status}, expected {expected}")]
    UnexpectedStatus {
        id: CycleId,
        status: CycleStatus,
        expected: CycleStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_drives_status() {
        let mut cycle = Cycle::new(CycleId(1), 1);
        cycle.enter_stage(CycleStage::PlanContent).unwrap();
        assert_eq!(cycle.status, CycleStatus::Planning);
        cycle.enter_stage(CycleStage::Post).unwrap();
        assert_eq!(cycle.status, CycleStatus::Producing);
        cycle.enter_stage(CycleStage::Reflect).unwrap();
        assert_eq!(cycle.status, CycleStatus::Measuring);
    }

    #[test]
    fn test_terminal_cycle_is_frozen() {
        let mut cycle = Cycle::new(CycleId(7), 3);
        cycle.fail("operator abort").unwrap();
        assert!(cycle.ended_at.is_some());

        let err = cycle.enter_stage(CycleStage::Produce).unwrap_err();
        assert_eq!(
            err,
            CycleError::Terminal {
                id: CycleId(7),
                status: CycleStatus::Failed
            }
        );
        assert!(cycle.complete().is_err());
        assert_eq!(cycle.failure_reason.as_deref(), Some("operator abort"));
    }

    #[test]
    fn test_deferred_is_resumable() {
        let mut cycle = Cycle::new(CycleId(2), 2);
        cycle.defer("budget").unwrap();
        assert!(!cycle.status.is_terminal());
        assert_eq!(cycle.summary["deferred_reason"], "budget");
        cycle.enter_stage(CycleStage::Produce).unwrap();
        assert_eq!(cycle.status, CycleStatus::Producing);
    }

    #[test]
    fn test_stage_names_round_trip() {
        for stage in CycleStage::ALL {
            assert_eq!(CycleStage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(CycleStage::parse("select_tools"), None);
    }
}
