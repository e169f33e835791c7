// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Learning Domain Model
//!
//! A [`Learning`] is a confidence-scored unit of accumulated knowledge scoped to
//! an agent role and category. Confidence moves toward 1 on successful
//! application (diminishing returns) and toward 0 on failure. Learnings are
//! never deleted: a low-confidence learning is soft-deactivated and from then on
//! ignored by every stage.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Aggregate Root:** Learning
//!
//! The free functions in this module are pure; the sweeps that apply them to
//! persisted learnings live in `application::learning_engine`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LearningId(pub Uuid);

impl LearningId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LearningId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LearningId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle tag. Deactivation is one-directional in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStatus {
    Active,
    Inactive,
}

/// Confidence in `[0, 1]`. Construction clamps, so the invariant cannot be broken.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: LearningId,
    /// Agent role the learning belongs to (e.g. "planner", "analyst").
    pub agent_role: String,
    pub category: String,
    pub content: String,
    pub context: Option<String>,
    pub confidence: Confidence,
    pub times_applied: u32,
    pub times_successful: u32,
    pub status: LearningStatus,
    /// Global learning created from this one, once promoted.
    pub promoted_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_applied_at: Option<DateTime<Utc>>,
}

impl Learning {
    pub fn new(
        agent_role: impl Into<String>,
        category: impl Into<String>,
        content: impl Into<String>,
        initial_confidence: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: LearningId::new(),
            agent_role: agent_role.into(),
            category: category.into(),
            content: content.into(),
            context: None,
            confidence: Confidence::new(initial_confidence),
            times_applied: 0,
            times_successful: 0,
            status: LearningStatus::Active,
            promoted_to: None,
            created_at: now,
            updated_at: now,
            last_applied_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == LearningStatus::Active
    }

    /// `None` until the learning has been applied at least once.
    pub fn success_rate(&self) -> Option<f64> {
        if self.times_applied == 0 {
            None
        } else {
            Some(self.times_successful as f64 / self.times_applied as f64)
        }
    }

    /// Record one application outcome. Returns the previous confidence.
    pub fn record_application(&mut self, success: bool, growth_rate: f64, decay_rate: f64) -> f64 {
        let previous = self.confidence.value();
        self.confidence = Confidence::new(calculate_new_confidence(
            previous,
            success,
            growth_rate,
            decay_rate,
        ));
        self.times_applied = self.times_applied.saturating_add(1);
        if success {
            self.times_successful = self.times_successful.saturating_add(1);
        }
        let now = Utc::now();
        self.last_applied_at = Some(now);
        self.updated_at = now;
        previous
    }

    pub fn deactivate(&mut self) {
        self.status = LearningStatus::Inactive;
        self.updated_at = Utc::now();
    }
}

/// Input for a learning produced by a stage, before it is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLearning {
    pub agent_role: String,
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub context: Option<String>,
}

/// Cross-agent learning created when a per-agent learning is promoted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalLearning {
    pub id: Uuid,
    pub source_learning_id: LearningId,
    pub category: String,
    pub content: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl GlobalLearning {
    pub fn promoted_from(learning: &Learning) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_learning_id: learning.id,
            category: global_category(&learning.category).to_string(),
            content: learning.content.clone(),
            confidence: learning.confidence.value(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome feedback for a learning that a stage applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LearningFeedback {
    pub learning_id: LearningId,
    pub success: bool,
}

// ============================================================================
// Pure confidence model
// ============================================================================

/// Success: `c + growth * (1 - c)`. Failure: `c - decay * c`. Clamped to `[0, 1]`.
pub fn calculate_new_confidence(current: f64, success: bool, growth_rate: f64, decay_rate: f64) -> f64 {
    let next = if success {
        current + growth_rate * (1.0 - current)
    } else {
        current - decay_rate * current
    };
    next.clamp(0.0, 1.0)
}

/// Strict: a learning sitting exactly on the threshold survives.
pub fn should_deactivate(confidence: f64, threshold: f64) -> bool {
    confidence < threshold
}

pub fn is_eligible_for_promotion(
    confidence: f64,
    times_applied: u32,
    confidence_threshold: f64,
    min_applications: u32,
) -> bool {
    confidence >= confidence_threshold && times_applied >= min_applications
}

/// No data is not failure: an absent success rate never exceeds the threshold.
pub fn exceeds_failure_threshold(success_rate: Option<f64>, threshold: f64) -> bool {
    match success_rate {
        Some(rate) => (1.0 - rate) > threshold,
        None => false,
    }
}

/// Global learnings are bucketed into `content | timing | audience | platform | niche`.
pub fn global_category(agent_category: &str) -> &'static str {
    match agent_category {
        "tool_characteristics" | "tool_combination" | "tool_failure_pattern" | "tool_update"
        | "platform" => "platform",
        "timing" => "timing",
        "audience" => "audience",
        "niche" => "niche",
        _ => "content",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATES: [(f64, f64); 4] = [(0.1, 0.15), (0.5, 0.5), (1.0, 1.0), (0.01, 0.9)];

    #[test]
    fn test_success_never_decreases_and_failure_never_increases() {
        for step in 0..=100 {
            let c = step as f64 / 100.0;
            for (growth, decay) in RATES {
                let up = calculate_new_confidence(c, true, growth, decay);
                let down = calculate_new_confidence(c, false, growth, decay);
                assert!(up >= c, "success lowered {c} to {up}");
                assert!(down <= c, "failure raised {c} to {down}");
                assert!((0.0..=1.0).contains(&up));
                assert!((0.0..=1.0).contains(&down));
            }
        }
    }

    #[test]
    fn test_boundaries_are_fixed_points() {
        for (growth, decay) in RATES {
            assert_eq!(calculate_new_confidence(1.0, true, growth, decay), 1.0);
            assert_eq!(calculate_new_confidence(0.0, false, growth, decay), 0.0);
        }
    }

    #[test]
    fn test_growth_has_diminishing_returns() {
        let low = calculate_new_confidence(0.2, true, 0.1, 0.15) - 0.2;
        let high = calculate_new_confidence(0.9, true, 0.1, 0.15) - 0.9;
        assert!(low > high);
    }

    #[test]
    fn test_default_rates() {
        assert!((calculate_new_confidence(0.5, true, 0.1, 0.15) - 0.55).abs() < 1e-12);
        assert!((calculate_new_confidence(0.5, false, 0.1, 0.15) - 0.425).abs() < 1e-12);
    }

    #[test]
    fn test_should_deactivate_is_strict() {
        assert!(should_deactivate(0.19, 0.2));
        assert!(!should_deactivate(0.2, 0.2));
        assert!(!should_deactivate(0.21, 0.2));
    }

    #[test]
    fn test_promotion_is_boundary_inclusive() {
        assert!(is_eligible_for_promotion(0.8, 3, 0.8, 3));
        assert!(!is_eligible_for_promotion(0.79, 10, 0.8, 3));
        assert!(!is_eligible_for_promotion(0.95, 2, 0.8, 3));
    }

    #[test]
    fn test_failure_threshold() {
        assert!(!exceeds_failure_threshold(None, 0.3));
        assert!(exceeds_failure_threshold(Some(0.6), 0.3));
        // failure rate exactly at threshold is not exceeding
        assert!(!exceeds_failure_threshold(Some(0.75), 0.25));
        assert!(!exceeds_failure_threshold(Some(1.0), 0.0));
    }

    #[test]
    fn test_record_application_updates_counters() {
        let mut learning = Learning::new("planner", "timing", "post at 19:00", 0.5);
        assert_eq!(learning.success_rate(), None);

        let previous = learning.record_application(true, 0.1, 0.15);
        assert_eq!(previous, 0.5);
        learning.record_application(false, 0.1, 0.15);

        assert_eq!(learning.times_applied, 2);
        assert_eq!(learning.times_successful, 1);
        assert_eq!(learning.success_rate(), Some(0.5));
        assert!(learning.last_applied_at.is_some());
    }

    #[test]
    fn test_confidence_clamps_on_construction() {
        assert_eq!(Confidence::new(1.7).value(), 1.0);
        assert_eq!(Confidence::new(-0.2).value(), 0.0);
        assert_eq!(Confidence::new(f64::NAN).value(), 0.0);
    }

    #[test]
    fn test_global_category_mapping() {
        assert_eq!(global_category("tool_update"), "platform");
        assert_eq!(global_category("audience"), "audience");
        assert_eq!(global_category("mistake"), "content");
        assert_eq!(global_category("something_new"), "content");
    }
}
