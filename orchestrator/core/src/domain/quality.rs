// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Quality Scorer
//!
//! Weighted multi-dimension score (0-10) for a produced content item, plus the
//! pass/fail verdict the cycle engine gates on. Only the aggregate score is
//! persisted; dimensions are rebuilt per item.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityDimension {
    pub name: String,
    pub score: f64,
    pub weight: f64,
}

impl QualityDimension {
    pub fn new(name: impl Into<String>, score: f64, weight: f64) -> Self {
        Self {
            name: name.into(),
            score,
            weight,
        }
    }
}

/// Weighted mean with weights normalised to sum to 1, rounded to one decimal.
///
/// An empty list, or one whose weights sum to zero, scores 0.
pub fn calculate_weighted_score(dimensions: &[QualityDimension]) -> f64 {
    if dimensions.is_empty() {
        return 0.0;
    }
    let total_weight: f64 = dimensions.iter().map(|d| d.weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = dimensions
        .iter()
        .map(|d| d.score * (d.weight / total_weight))
        .sum();
    (weighted * 10.0).round() / 10.0
}

/// Raw per-axis scores reported by the production stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub visual_quality: f64,
    pub audio_quality: f64,
    pub script_coherence: f64,
    pub engagement_potential: f64,
    pub brand_consistency: f64,
    pub technical_compliance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub visual_quality: f64,
    pub audio_quality: f64,
    pub script_coherence: f64,
    pub engagement_potential: f64,
    pub brand_consistency: f64,
    pub technical_compliance: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            visual_quality: 0.25,
            audio_quality: 0.20,
            script_coherence: 0.20,
            engagement_potential: 0.15,
            brand_consistency: 0.10,
            technical_compliance: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub overall_score: f64,
    pub passed: bool,
    pub dimensions: Vec<QualityDimension>,
}

pub fn score_quality(scores: &QualityScores, weights: &QualityWeights, pass_threshold: f64) -> QualityVerdict {
    let axis = |name: &str, score: f64, weight: f64| QualityDimension::new(name, score.clamp(0.0, 10.0), weight);
    let dimensions = vec![
        axis("visual_quality", scores.visual_quality, weights.visual_quality),
        axis("audio_quality", scores.audio_quality, weights.audio_quality),
        axis("script_coherence", scores.script_coherence, weights.script_coherence),
        axis("engagement_potential", scores.engagement_potential, weights.engagement_potential),
        axis("brand_consistency", scores.brand_consistency, weights.brand_consistency),
        axis("technical_compliance", scores.technical_compliance, weights.technical_compliance),
    ];
    let overall_score = calculate_weighted_score(&dimensions);
    QualityVerdict {
        overall_score,
        passed: overall_score >= pass_threshold,
        dimensions,
    }
}
