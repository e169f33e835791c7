// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Revision & Rejection Controller
//!
//! Bounds the plan → approval loop and routes a rejected plan to the upstream
//! stage that can fix its cause. Reaching the revision limit force-approves the
//! plan instead of looping forever.

use serde::{Deserialize, Serialize};

use crate::domain::cycle::CycleStage;

/// Stated cause of a plan rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    PlanRevision,
    DataInsufficient,
    HypothesisWeak,
}

impl RejectionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCategory::PlanRevision => "plan_revision",
            RejectionCategory::DataInsufficient => "data_insufficient",
            RejectionCategory::HypothesisWeak => "hypothesis_weak",
        }
    }

    /// `None` for anything outside the three known categories.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "plan_revision" => Some(RejectionCategory::PlanRevision),
            "data_insufficient" => Some(RejectionCategory::DataInsufficient),
            "hypothesis_weak" => Some(RejectionCategory::HypothesisWeak),
            _ => None,
        }
    }

    pub fn target_stage(&self) -> CycleStage {
        match self {
            RejectionCategory::DataInsufficient => CycleStage::CollectIntel,
            RejectionCategory::HypothesisWeak => CycleStage::AnalyzeCycle,
            RejectionCategory::PlanRevision => CycleStage::PlanContent,
        }
    }
}

impl std::fmt::Display for RejectionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_valid_rejection_category(value: &str) -> bool {
    RejectionCategory::parse(value).is_some()
}

/// Missing or unrecognised categories fall back to `plan_content`.
pub fn route_rejection(category: Option<&str>) -> CycleStage {
    category
        .and_then(RejectionCategory::parse)
        .map(|c| c.target_stage())
        .unwrap_or(CycleStage::PlanContent)
}

pub fn rejection_explanation(category: Option<RejectionCategory>) -> &'static str {
    match category {
        Some(RejectionCategory::DataInsufficient) => {
            "Insufficient data: returning to collect_intel for additional market research"
        }
        Some(RejectionCategory::HypothesisWeak) => {
            "Weak hypothesis: returning to analyze_cycle for deeper analysis"
        }
        Some(RejectionCategory::PlanRevision) => {
            "Plan needs revision: returning to plan_content for adjustments"
        }
        None => "Unspecified reason: returning to plan_content for revision",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevisionCheck {
    pub revision_count: u32,
    pub max_revisions: u32,
    pub can_revise: bool,
    pub force_approve: bool,
}

pub fn check_revision_limit(revision_count: u32, max_revisions: u32) -> RevisionCheck {
    let can_revise = revision_count < max_revisions;
    RevisionCheck {
        revision_count,
        max_revisions,
        can_revise,
        force_approve: !can_revise,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_limit() {
        let at_limit = check_revision_limit(3, 3);
        assert!(!at_limit.can_revise);
        assert!(at_limit.force_approve);

        let below = check_revision_limit(2, 3);
        assert!(below.can_revise);
        assert!(!below.force_approve);

        assert!(check_revision_limit(0, 0).force_approve);
    }

    #[test]
    fn test_route_rejection() {
        assert_eq!(route_rejection(Some("data_insufficient")), CycleStage::CollectIntel);
        assert_eq!(route_rejection(Some("hypothesis_weak")), CycleStage::AnalyzeCycle);
        assert_eq!(route_rejection(Some("plan_revision")), CycleStage::PlanContent);
        assert_eq!(route_rejection(None), CycleStage::PlanContent);
        assert_eq!(route_rejection(Some("DATA_INSUFFICIENT")), CycleStage::PlanContent);
        assert_eq!(route_rejection(Some("")), CycleStage::PlanContent);
    }

    #[test]
    fn test_category_validation() {
        assert!(is_valid_rejection_category("hypothesis_weak"));
        assert!(!is_valid_rejection_category("budget"));
        assert!(!is_valid_rejection_category(""));
    }

    #[test]
    fn test_explanations_name_the_target() {
        for category in [
            RejectionCategory::PlanRevision,
            RejectionCategory::DataInsufficient,
            RejectionCategory::HypothesisWeak,
        ] {
            let target = category.target_stage().as_str();
            assert!(rejection_explanation(Some(category)).contains(target));
        }
        assert!(rejection_explanation(None).contains("plan_content"));
    }
}
