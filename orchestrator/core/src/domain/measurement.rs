// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Measurement Domain Model
//!
//! Publications, the [`MeasurementTarget`]s scheduled for them and the metrics
//! collected from platforms. Also hosts the posting-cooldown arithmetic.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Aggregate Root:** MeasurementTarget
//!
//! A target is created per publication and window, becomes due at
//! `posted_at + window`, and is collected at most once. Once collected it is
//! immutable.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::cycle::CycleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Youtube,
    Tiktok,
    Instagram,
    X,
}

impl Platform {
    pub const ALL: [Platform; 4] = [Platform::Youtube, Platform::Tiktok, Platform::Instagram, Platform::X];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Tiktok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::X => "x",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == value)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Offset after posting at which metrics are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementWindow {
    #[serde(rename = "48h")]
    Hours48,
    #[serde(rename = "7d")]
    Days7,
    #[serde(rename = "30d")]
    Days30,
}

impl MeasurementWindow {
    pub const ALL: [MeasurementWindow; 3] = [
        MeasurementWindow::Hours48,
        MeasurementWindow::Days7,
        MeasurementWindow::Days30,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementWindow::Hours48 => "48h",
            MeasurementWindow::Days7 => "7d",
            MeasurementWindow::Days30 => "30d",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|w| w.as_str() == value)
    }

    pub fn offset(&self) -> Duration {
        match self {
            MeasurementWindow::Hours48 => Duration::hours(48),
            MeasurementWindow::Days7 => Duration::days(7),
            MeasurementWindow::Days30 => Duration::days(30),
        }
    }

    /// Follow-up analysis queued once this window is collected.
    pub fn analysis(&self) -> Option<AnalysisKind> {
        match self {
            MeasurementWindow::Hours48 => Some(AnalysisKind::Micro),
            MeasurementWindow::Days7 => Some(AnalysisKind::Cumulative),
            MeasurementWindow::Days30 => None,
        }
    }
}

impl std::fmt::Display for MeasurementWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Micro,
    Cumulative,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Micro => "micro",
            AnalysisKind::Cumulative => "cumulative",
        }
    }
}

/// A post reported by the `post` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub cycle_id: Option<CycleId>,
    pub content_id: String,
    pub account_id: String,
    pub platform: Platform,
    pub platform_post_id: String,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pending,
    Collected,
    /// Permanently failed (client error); never collected.
    Failed,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Collected => "collected",
            TargetStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TargetStatus::Pending),
            "collected" => Some(TargetStatus::Collected),
            "failed" => Some(TargetStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(pub Uuid);

impl TargetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementTarget {
    pub id: TargetId,
    pub publication_id: Uuid,
    pub content_id: String,
    pub account_id: String,
    pub platform: Platform,
    pub platform_post_id: String,
    pub posted_at: DateTime<Utc>,
    pub window: MeasurementWindow,
    pub due_at: DateTime<Utc>,
    pub status: TargetStatus,
    pub collected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl MeasurementTarget {
    pub fn for_publication(publication: &Publication, window: MeasurementWindow) -> Self {
        Self {
            id: TargetId::new(),
            publication_id: publication.id,
            content_id: publication.content_id.clone(),
            account_id: publication.account_id.clone(),
            platform: publication.platform,
            platform_post_id: publication.platform_post_id.clone(),
            posted_at: publication.posted_at,
            window,
            due_at: publication.posted_at + window.offset(),
            status: TargetStatus::Pending,
            collected_at: None,
            last_error: None,
        }
    }

    /// One target per window for a fresh publication.
    pub fn schedule(publication: &Publication) -> Vec<Self> {
        MeasurementWindow::ALL
            .iter()
            .map(|w| Self::for_publication(publication, *w))
            .collect()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TargetStatus::Pending && self.due_at <= now
    }
}

/// Counts as reported by a platform adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformMetrics {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub saves: Option<u64>,
    pub watch_time_seconds: Option<f64>,
    pub completion_rate: Option<f64>,
    pub impressions: Option<u64>,
    pub reach: Option<u64>,
    pub follower_delta: i64,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedMetrics {
    #[serde(flatten)]
    pub metrics: PlatformMetrics,
    pub engagement_rate: f64,
    pub collected_at: DateTime<Utc>,
}

impl CollectedMetrics {
    pub fn from_platform(metrics: PlatformMetrics, collected_at: DateTime<Utc>) -> Self {
        let engagement_rate = engagement_rate(metrics.likes, metrics.comments, metrics.shares, metrics.views);
        Self {
            metrics,
            engagement_rate,
            collected_at,
        }
    }
}

/// `(likes + comments + shares) / views`, 4 decimals, 0 without views.
pub fn engagement_rate(likes: u64, comments: u64, shares: u64, views: u64) -> f64 {
    if views == 0 {
        return 0.0;
    }
    let engaged = likes.saturating_add(comments).saturating_add(shares) as f64;
    (engaged / views as f64 * 10_000.0).round() / 10_000.0
}

/// A platform whose credentials were rejected. Collection stays parked until
/// an operator clears the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformSuspension {
    pub platform: Platform,
    pub reason: String,
    pub suspended_at: DateTime<Utc>,
}

// ============================================================================
// Posting cooldown
// ============================================================================

/// `last_posted_at + cooldown_hours`. A zero cooldown returns the input;
/// `None` when the sum falls outside the representable calendar.
pub fn calculate_next_available(last_posted_at: DateTime<Utc>, cooldown_hours: f64) -> Option<DateTime<Utc>> {
    if !cooldown_hours.is_finite() {
        return None;
    }
    // Float-to-int casts saturate, so huge cooldowns land on i64::MAX and fail below.
    let millis = (cooldown_hours.max(0.0) * 3_600_000.0).round() as i64;
    last_posted_at.checked_add_signed(Duration::try_milliseconds(millis)?)
}

/// Whole minutes until `next_available`, rounded up; 0 once it has passed.
pub fn calculate_remaining_minutes(next_available: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let diff_ms = (next_available - now).num_milliseconds();
    if diff_ms <= 0 {
        return 0;
    }
    (diff_ms + 59_999) / 60_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_next_available_crosses_day_boundary() {
        let next = calculate_next_available(at("2026-02-23T22:00:00.000Z"), 4.0).unwrap();
        assert_eq!(next, at("2026-02-24T02:00:00.000Z"));
    }

    #[test]
    fn test_zero_cooldown_is_immediate() {
        let last = at("2026-02-23T22:00:00Z");
        assert_eq!(calculate_next_available(last, 0.0), Some(last));
        assert_eq!(calculate_remaining_minutes(last, last), 0);
    }

    #[test]
    fn test_unrepresentable_cooldown_is_none() {
        let last = at("2026-02-23T22:00:00Z");
        assert_eq!(calculate_next_available(last, 1e10), None);
        assert_eq!(calculate_next_available(last, f64::INFINITY), None);
        assert_eq!(calculate_next_available(last, f64::NAN), None);
        assert!(calculate_next_available(last, 24.0 * 365.0).is_some());
    }

    #[test]
    fn test_remaining_minutes_rounds_up() {
        let now = Utc.with_ymd_and_hms(2026, 2, 23, 23, 59, 30).unwrap();
        let next = at("2026-02-24T00:01:00Z");
        assert_eq!(calculate_remaining_minutes(next, now), 2);
        assert_eq!(calculate_remaining_minutes(now, next), 0);
    }

    #[test]
    fn test_engagement_rate() {
        assert_eq!(engagement_rate(10, 5, 5, 0), 0.0);
        assert_eq!(engagement_rate(1, 0, 0, 3), 0.3333);
        assert_eq!(engagement_rate(50, 30, 20, 1000), 0.1);
    }

    #[test]
    fn test_schedule_creates_one_target_per_window() {
        let publication = Publication {
            id: Uuid::new_v4(),
            cycle_id: Some(CycleId(4)),
            content_id: "CNT-1".into(),
            account_id: "ACC-1".into(),
            platform: Platform::Tiktok,
            platform_post_id: "tt-99".into(),
            posted_at: at("2026-03-01T10:00:00Z"),
        };
        let targets = MeasurementTarget::schedule(&publication);
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].due_at, at("2026-03-03T10:00:00Z"));
        assert_eq!(targets[2].due_at, at("2026-03-31T10:00:00Z"));
        assert!(targets[0].is_due(at("2026-03-03T10:00:00Z")));
        assert!(!targets[1].is_due(at("2026-03-03T10:00:00Z")));
    }

    #[test]
    fn test_window_analysis_mapping() {
        assert_eq!(MeasurementWindow::Hours48.analysis(), Some(AnalysisKind::Micro));
        assert_eq!(MeasurementWindow::Days7.analysis(), Some(AnalysisKind::Cumulative));
        assert_eq!(MeasurementWindow::Days30.analysis(), None);
    }
}
