// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Learning Engine
//!
//! Applies outcome feedback to persisted learnings and runs the deactivation,
//! promotion and failure sweeps. Every threshold and rate is read from the
//! settings store at the moment it is needed.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrate the pure confidence model over `LearningRepository`
//! - **Integration:** Learning Engine → LearningRepository / SettingsProvider → EventBus

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::events::LearningEvent;
use crate::domain::learning::{
    exceeds_failure_threshold, is_eligible_for_promotion, GlobalLearning, Learning, LearningId, NewLearning,
};
use crate::domain::repository::{LearningRepository, RepositoryError};
use crate::domain::settings::{keys, SettingsError, SettingsProvider};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, thiserror::Error)]
pub enum LearningError {
    #[error("Learning not found: {0}")]
    NotFound(LearningId),

    #[error("Learning {0} is inactive")]
    Inactive(LearningId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceUpdate {
    pub learning_id: LearningId,
    pub previous: f64,
    pub current: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotedLearning {
    pub learning_id: LearningId,
    pub global_learning_id: uuid::Uuid,
    pub global_category: String,
}

/// Outcome of one reflect-time pass over the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub deactivated: Vec<LearningId>,
    pub promoted: Vec<PromotedLearning>,
    pub failing: Vec<LearningId>,
}

pub struct LearningEngine {
    repository: Arc<dyn LearningRepository>,
    settings: Arc<dyn SettingsProvider>,
    event_bus: EventBus,
}

impl LearningEngine {
    pub fn new(
        repository: Arc<dyn LearningRepository>,
        settings: Arc<dyn SettingsProvider>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            repository,
            settings,
            event_bus,
        }
    }

    pub async fn active_learnings(&self, agent_role: Option<&str>) -> Result<Vec<Learning>, LearningError> {
        Ok(self.repository.find_active(agent_role).await?)
    }

    /// Persist learnings produced by a stage at `LEARNING_INITIAL_CONFIDENCE`.
    pub async fn record_learnings(&self, new: &[NewLearning]) -> Result<Vec<LearningId>, LearningError> {
        if new.is_empty() {
            return Ok(Vec::new());
        }
        let initial = self.settings.get_number(keys::LEARNING_INITIAL_CONFIDENCE).await?;

        let mut ids = Vec::with_capacity(new.len());
        for item in new {
            let mut learning = Learning::new(&item.agent_role, &item.category, &item.content, initial);
            learning.context = item.context.clone();
            self.repository.save(&learning).await?;

            self.event_bus.publish_learning_event(LearningEvent::LearningRecorded {
                learning_id: learning.id,
                agent_role: learning.agent_role.clone(),
                category: learning.category.clone(),
                recorded_at: learning.created_at,
            });
            ids.push(learning.id);
        }
        debug!(count = ids.len(), initial_confidence = initial, "Recorded new learnings");
        Ok(ids)
    }

    /// Apply one success/failure outcome to an active learning. Deactivated
    /// learnings are frozen and return `Inactive`.
    pub async fn apply_feedback(&self, id: LearningId, success: bool) -> Result<ConfidenceUpdate, LearningError> {
        let mut learning = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(LearningError::NotFound(id))?;
        if !learning.is_active() {
            return Err(LearningError::Inactive(id));
        }

        let growth = self.settings.get_number(keys::CONFIDENCE_GROWTH_RATE).await?;
        let decay = self.settings.get_number(keys::CONFIDENCE_DECAY_RATE).await?;

        let previous = learning.record_application(success, growth, decay);
        match self.repository.record_feedback(&learning).await {
            Ok(()) => {}
            // Deactivated by a concurrent sweep.
            Err(RepositoryError::Conflict(_)) => return Err(LearningError::Inactive(id)),
            Err(RepositoryError::NotFound(_)) => return Err(LearningError::NotFound(id)),
            Err(e) => return Err(e.into()),
        }

        let current = learning.confidence.value();
        debug!(learning_id = %id, success, previous, current, "Learning confidence updated");
        metrics::counter!("reelforge_learning_feedback_total", "outcome" => if success { "success" } else { "failure" })
            .increment(1);

        self.event_bus.publish_learning_event(LearningEvent::ConfidenceUpdated {
            learning_id: id,
            previous,
            current,
            success,
            updated_at: learning.updated_at,
        });

        Ok(ConfidenceUpdate {
            learning_id: id,
            previous,
            current,
        })
    }

    /// Soft-deactivate every active learning below `LEARNING_DEACTIVATION_THRESHOLD`.
    pub async fn deactivation_sweep(&self, agent_role: Option<&str>) -> Result<Vec<LearningId>, LearningError> {
        let threshold = self.settings.get_number(keys::LEARNING_DEACTIVATION_THRESHOLD).await?;
        let ids = self.repository.deactivate_below(threshold, agent_role).await?;

        if !ids.is_empty() {
            info!(count = ids.len(), threshold, agent_role = ?agent_role, "Deactivated low-confidence learnings");
            metrics::counter!("reelforge_learnings_deactivated_total").increment(ids.len() as u64);
            self.event_bus.publish_learning_event(LearningEvent::LearningsDeactivated {
                learning_ids: ids.clone(),
                threshold,
                swept_at: Utc::now(),
            });
        }
        Ok(ids)
    }

    /// Promote eligible, not-yet-promoted active learnings to global learnings.
    pub async fn promotion_sweep(&self, agent_role: Option<&str>) -> Result<Vec<PromotedLearning>, LearningError> {
        let threshold = self.settings.get_number(keys::LEARNING_PROMOTION_THRESHOLD).await?;
        let min_applied = self.settings.get_count(keys::LEARNING_PROMOTION_MIN_APPLIED).await?;

        let mut promoted = Vec::new();
        for learning in self.repository.find_active(agent_role).await? {
            if learning.promoted_to.is_some()
                || !is_eligible_for_promotion(learning.confidence.value(), learning.times_applied, threshold, min_applied)
            {
                continue;
            }

            let global = GlobalLearning::promoted_from(&learning);
            match self.repository.promote(learning.id, &global).await {
                Ok(()) => {}
                // Another sweep got there first.
                Err(RepositoryError::Conflict(reason)) => {
                    debug!(learning_id = %learning.id, %reason, "Skipping already promoted learning");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            info!(
                learning_id = %learning.id,
                global_learning_id = %global.id,
                global_category = %global.category,
                "Promoted learning to global knowledge"
            );
            self.event_bus.publish_learning_event(LearningEvent::LearningPromoted {
                learning_id: learning.id,
                global_learning_id: global.id,
                global_category: global.category.clone(),
                promoted_at: global.created_at,
            });
            promoted.push(PromotedLearning {
                learning_id: learning.id,
                global_learning_id: global.id,
                global_category: global.category,
            });
        }
        Ok(promoted)
    }

    /// Active learnings whose failure rate exceeds `LEARNING_FAILURE_THRESHOLD`.
    pub async fn failing_learnings(&self, agent_role: Option<&str>) -> Result<Vec<LearningId>, LearningError> {
        let threshold = self.settings.get_number(keys::LEARNING_FAILURE_THRESHOLD).await?;
        let failing: Vec<LearningId> = self
            .repository
            .find_active(agent_role)
            .await?
            .into_iter()
            .filter(|l| exceeds_failure_threshold(l.success_rate(), threshold))
            .map(|l| l.id)
            .collect();

        if !failing.is_empty() {
            warn!(count = failing.len(), threshold, "Learnings exceed failure threshold");
        }
        Ok(failing)
    }

    /// Reflect-time pass: deactivation, then promotion, then failure flagging.
    pub async fn sweep(&self, agent_role: Option<&str>) -> Result<SweepReport, LearningError> {
        let deactivated = self.deactivation_sweep(agent_role).await?;
        let promoted = self.promotion_sweep(agent_role).await?;
        let failing = self.failing_learnings(agent_role).await?;
        Ok(SweepReport {
            deactivated,
            promoted,
            failing,
        })
    }
}
