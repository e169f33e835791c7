// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cycle Graph
//!
//! The cycle's conditional edges as a pure function of
//! `(current stage, stage outcome, persisted loop counters)`. The engine owns
//! I/O and execution; every branching decision (rejection routing, revision
//! limiting, quality and budget gating) is made here.
//!
//! ```text
//! set_strategy → collect_intel → analyze_cycle → plan_content → approve_plan
//!                      ▲               ▲              ▲              │
//!                      └───────────────┴──────────────┴── rejected ──┤
//!                                                                    ▼ approved / forced
//!                           reflect ◀── measure ◀── post ◀────── produce
//! ```

use serde::Serialize;

use crate::domain::cycle::CycleStage;
use crate::domain::revision::{check_revision_limit, RejectionCategory};

/// What a stage (or a gate evaluated at it) reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "category", rename_all = "snake_case")]
pub enum StageOutcome {
    Done,
    Approved,
    Rejected(Option<RejectionCategory>),
    /// Quality score below `QUALITY_PASS_THRESHOLD`.
    QualityFailed,
    /// Budget gate refused production.
    BudgetBlocked,
}

/// Revision counters read from the current plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopState {
    pub revision_count: u32,
    pub max_revisions: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    Goto { stage: CycleStage },
    /// Loop back upstream; the plan's revision count goes up by one.
    Revise {
        target: CycleStage,
        category: Option<RejectionCategory>,
    },
    /// Revision limit reached: approve anyway and continue at `next`.
    ForceApprove { next: CycleStage },
    /// Park the cycle until budget frees up.
    Defer,
    Complete,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Stage {stage} cannot report outcome {outcome:?}")]
    UnexpectedOutcome {
        stage: CycleStage,
        outcome: StageOutcome,
    },
}

/// Happy-path successor; `None` after `reflect`.
pub fn successor(stage: CycleStage) -> Option<CycleStage> {
    let index = CycleStage::ALL.iter().position(|s| *s == stage)?;
    CycleStage::ALL.get(index + 1).copied()
}

pub fn next_transition(
    stage: CycleStage,
    outcome: StageOutcome,
    loop_state: LoopState,
) -> Result<Transition, GraphError> {
    let unexpected = || GraphError::UnexpectedOutcome { stage, outcome };

    match (stage, outcome) {
        (CycleStage::ApprovePlan, StageOutcome::Approved) => Ok(Transition::Goto {
            stage: CycleStage::Produce,
        }),
        (CycleStage::ApprovePlan, StageOutcome::Rejected(category)) => {
            Ok(revise_or_force(category, CycleStage::Produce, loop_state))
        }
        (CycleStage::ApprovePlan | CycleStage::Produce, StageOutcome::QualityFailed) => {
            let forced_next = if stage == CycleStage::Produce {
                CycleStage::Post
            } else {
                CycleStage::Produce
            };
            Ok(revise_or_force(
                Some(RejectionCategory::PlanRevision),
                forced_next,
                loop_state,
            ))
        }
        (CycleStage::Produce, StageOutcome::BudgetBlocked) => Ok(Transition::Defer),
        (CycleStage::ApprovePlan, StageOutcome::Done) => Err(unexpected()),
        (CycleStage::Reflect, StageOutcome::Done) => Ok(Transition::Complete),
        (_, StageOutcome::Done) => successor(stage)
            .map(|stage| Transition::Goto { stage })
            .ok_or_else(unexpected),
        _ => Err(unexpected()),
    }
}

fn revise_or_force(
    category: Option<RejectionCategory>,
    forced_next: CycleStage,
    loop_state: LoopState,
) -> Transition {
    let check = check_revision_limit(loop_state.revision_count, loop_state.max_revisions);
    if check.force_approve {
        return Transition::ForceApprove { next: forced_next };
    }
    Transition::Revise {
        target: category
            .map(|c| c.target_stage())
            .unwrap_or(CycleStage::PlanContent),
        category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRESH: LoopState = LoopState {
        revision_count: 0,
        max_revisions: 3,
    };

    #[test]
    fn test_happy_path_walks_every_stage() {
        let mut stage = CycleStage::SetStrategy;
        let mut visited = vec![stage];
        loop {
            let outcome = if stage == CycleStage::ApprovePlan {
                StageOutcome::Approved
            } else {
                StageOutcome::Done
            };
            match next_transition(stage, outcome, FRESH).unwrap() {
                Transition::Goto { stage: next } => {
                    stage = next;
                    visited.push(next);
                }
                Transition::Complete => break,
                other => panic!("unexpected transition {other:?}"),
            }
        }
        assert_eq!(visited, CycleStage::ALL.to_vec());
    }

    #[test]
    fn test_rejection_routes_by_category() {
        let cases = [
            (Some(RejectionCategory::DataInsufficient), CycleStage::CollectIntel),
            (Some(RejectionCategory::HypothesisWeak), CycleStage::AnalyzeCycle),
            (Some(RejectionCategory::PlanRevision), CycleStage::PlanContent),
            (None, CycleStage::PlanContent),
        ];
        for (category, expected) in cases {
            let transition =
                next_transition(CycleStage::ApprovePlan, StageOutcome::Rejected(category), FRESH).unwrap();
            assert_eq!(
                transition,
                Transition::Revise {
                    target: expected,
                    category
                }
            );
        }
    }

    #[test]
    fn test_revision_limit_forces_approval() {
        let exhausted = LoopState {
            revision_count: 3,
            max_revisions: 3,
        };
        let transition = next_transition(
            CycleStage::ApprovePlan,
            StageOutcome::Rejected(Some(RejectionCategory::HypothesisWeak)),
            exhausted,
        )
        .unwrap();
        assert_eq!(
            transition,
            Transition::ForceApprove {
                next: CycleStage::Produce
            }
        );
    }

    #[test]
    fn test_quality_failure_behaves_like_plan_revision() {
        for stage in [CycleStage::ApprovePlan, CycleStage::Produce] {
            let transition = next_transition(stage, StageOutcome::QualityFailed, FRESH).unwrap();
            assert_eq!(
                transition,
                Transition::Revise {
                    target: CycleStage::PlanContent,
                    category: Some(RejectionCategory::PlanRevision)
                }
            );
        }

        let exhausted = LoopState {
            revision_count: 3,
            max_revisions: 3,
        };
        assert_eq!(
            next_transition(CycleStage::Produce, StageOutcome::QualityFailed, exhausted).unwrap(),
            Transition::ForceApprove {
                next: CycleStage::Post
            }
        );
    }

    #[test]
    fn test_budget_block_defers() {
        assert_eq!(
            next_transition(CycleStage::Produce, StageOutcome::BudgetBlocked, FRESH).unwrap(),
            Transition::Defer
        );
    }

    #[test]
    fn test_outcomes_outside_their_stage_are_rejected() {
        assert!(next_transition(CycleStage::CollectIntel, StageOutcome::Approved, FRESH).is_err());
        assert!(next_transition(CycleStage::ApprovePlan, StageOutcome::Done, FRESH).is_err());
        assert!(next_transition(CycleStage::Post, StageOutcome::BudgetBlocked, FRESH).is_err());
        assert!(next_transition(CycleStage::Measure, StageOutcome::Rejected(None), FRESH).is_err());
    }
}
