// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Measurement Job - background collection of post-publication metrics
//!
//! Each platform runs its own worker over the state machine
//!
//! ```text
//! detect_targets ──(none due)──▶ sleep ──(poll interval)──▶ detect_targets
//!        │
//!        └──(due)──▶ collect ──▶ save_metrics ──▶ collect … ──▶ detect_targets
//! ```
//!
//! Collections are serialised per platform so a platform's rate limits are
//! respected, while different platforms proceed in parallel. The platform lock
//! is held from the fetch through the save, and a target is re-read once the
//! lock is taken, so overlapping passes never fetch a settled target twice.
//! Credential suspensions live in the store and survive restarts; they are
//! cleared with `reelforge measurement resume`. Poll interval, batch size and
//! retry parameters are read from settings on every pass.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Measurement polling sub-workflow
//! - **Integration:** MeasurementRepository → MetricsAdapter → EventBus

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::events::{MeasurementEvent, OperatorAlert};
use crate::domain::measurement::{
    CollectedMetrics, MeasurementTarget, Platform, PlatformMetrics, PlatformSuspension, TargetStatus,
};
use crate::domain::platform::{AdapterRegistry, MetricsAdapter, PlatformError};
use crate::domain::repository::{MeasurementRepository, RepositoryError};
use crate::domain::settings::{keys, SettingsError, SettingsProvider};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::retry::{retry_with_backoff, RetryPolicy};

const FALLBACK_POLL_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("No metrics adapter registered for {0}")]
    NoAdapter(Platform),
}

/// Where a platform worker is in its loop.
#[derive(Debug)]
enum JobState {
    DetectTargets,
    Sleep,
    Collect(VecDeque<MeasurementTarget>),
    SaveMetrics {
        target: MeasurementTarget,
        metrics: PlatformMetrics,
        remaining: VecDeque<MeasurementTarget>,
        serialised: OwnedMutexGuard<()>,
    },
}

/// What one detect → collect pass did for a platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub collected: usize,
    pub failed: usize,
    pub deferred: usize,
    pub suspended: bool,
}

pub struct MeasurementJob {
    targets: Arc<dyn MeasurementRepository>,
    adapters: AdapterRegistry,
    settings: Arc<dyn SettingsProvider>,
    event_bus: EventBus,
    platform_locks: DashMap<Platform, Arc<Mutex<()>>>,
    shutdown_token: CancellationToken,
}

impl MeasurementJob {
    pub fn new(
        targets: Arc<dyn MeasurementRepository>,
        adapters: AdapterRegistry,
        settings: Arc<dyn SettingsProvider>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            targets,
            adapters,
            settings,
            event_bus,
            platform_locks: DashMap::new(),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawn one worker per registered platform.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        self.adapters
            .platforms()
            .into_iter()
            .map(|platform| {
                let job = self.clone();
                tokio::spawn(async move { job.run_worker(platform).await })
            })
            .collect()
    }

    /// Platforms parked after a credential rejection.
    pub async fn suspended_platforms(&self) -> Result<Vec<PlatformSuspension>, MeasurementError> {
        Ok(self.targets.list_suspensions().await?)
    }

    /// Operator action after fixing credentials. Returns whether it was suspended.
    pub async fn resume_platform(&self, platform: Platform) -> Result<bool, MeasurementError> {
        let resumed = self.targets.resume_platform(platform).await?;
        if resumed {
            info!(platform = %platform, "Measurement collection resumed");
        }
        Ok(resumed)
    }

    async fn run_worker(&self, platform: Platform) {
        info!(platform = %platform, "Starting measurement worker");

        loop {
            match self.run_once(platform).await {
                Ok(report) if report != PassReport::default() => {
                    info!(
                        platform = %platform,
                        collected = report.collected,
                        failed = report.failed,
                        deferred = report.deferred,
                        suspended = report.suspended,
                        "Measurement pass finished"
                    );
                }
                Ok(_) => debug!(platform = %platform, "No measurement targets due"),
                Err(e) => warn!(platform = %platform, error = %e, "Measurement pass failed"),
            }

            let interval = self.poll_interval().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown_token.cancelled() => {
                    info!(platform = %platform, "Shutdown signal received, stopping measurement worker");
                    break;
                }
            }
        }
    }

    /// Drive the state machine from `detect_targets` until it reaches `sleep`.
    pub async fn run_once(&self, platform: Platform) -> Result<PassReport, MeasurementError> {
        let mut report = PassReport::default();
        let mut state = JobState::DetectTargets;
        loop {
            state = match state {
                JobState::Sleep => return Ok(report),
                other => self.step(platform, other, &mut report).await?,
            };
        }
    }

    async fn step(
        &self,
        platform: Platform,
        state: JobState,
        report: &mut PassReport,
    ) -> Result<JobState, MeasurementError> {
        match state {
            JobState::DetectTargets => {
                let due = self.detect_targets(platform).await?;
                if due.is_empty() {
                    Ok(JobState::Sleep)
                } else {
                    Ok(JobState::Collect(due.into()))
                }
            }
            JobState::Collect(mut queue) => {
                let Some(target) = queue.pop_front() else {
                    return Ok(JobState::DetectTargets);
                };
                self.collect(target, queue, report).await
            }
            JobState::SaveMetrics {
                target,
                metrics,
                remaining,
                serialised,
            } => {
                let saved = self.save_metrics(&target, metrics).await?;
                drop(serialised);
                if saved {
                    report.collected += 1;
                }
                Ok(JobState::Collect(remaining))
            }
            JobState::Sleep => Ok(JobState::Sleep),
        }
    }

    /// Due, pending targets for the platform, earliest first. Empty while the
    /// platform is suspended.
    pub async fn detect_targets(&self, platform: Platform) -> Result<Vec<MeasurementTarget>, MeasurementError> {
        if self.targets.find_suspension(platform).await?.is_some() {
            debug!(platform = %platform, "Platform suspended, skipping detection");
            return Ok(Vec::new());
        }
        let batch_size = self.settings.get_count(keys::MEASUREMENT_BATCH_SIZE).await?.max(1) as usize;
        Ok(self.targets.find_due(Utc::now(), batch_size, Some(platform)).await?)
    }

    async fn collect(
        &self,
        target: MeasurementTarget,
        remaining: VecDeque<MeasurementTarget>,
        report: &mut PassReport,
    ) -> Result<JobState, MeasurementError> {
        let platform = target.platform;
        let adapter = self.adapters.get(platform).ok_or(MeasurementError::NoAdapter(platform))?;
        let policy = self.retry_policy().await?;

        let serialised = self.platform_lock(platform).lock_owned().await;

        // Another pass may have settled the target or suspended the platform
        // while this one waited for the lock.
        if self.targets.find_suspension(platform).await?.is_some() {
            return Ok(JobState::Sleep);
        }
        let target = match self.targets.find_by_id(target.id).await? {
            Some(current) if current.status == TargetStatus::Pending => current,
            _ => {
                debug!(target_id = %target.id, "Target settled while waiting, skipping");
                return Ok(JobState::Collect(remaining));
            }
        };

        debug!(
            target_id = %target.id,
            platform = %platform,
            window = target.window.as_str(),
            "Collecting metrics"
        );
        let fetched = retry_with_backoff(&policy, |attempt| {
            let adapter = adapter.clone();
            let target = &target;
            async move {
                let result = adapter.fetch_metrics(target).await;
                if let Err(PlatformError::RateLimited { .. }) = &result {
                    metrics::counter!("reelforge_measurement_rate_limited_total", "platform" => platform.as_str())
                        .increment(1);
                    debug!(target_id = %target.id, attempt, "Rate limited");
                }
                result
            }
        })
        .await;

        match fetched {
            Ok(metrics) => Ok(JobState::SaveMetrics {
                target,
                metrics,
                remaining,
                serialised,
            }),
            Err(failure) => match failure.error {
                PlatformError::Unauthorized(message) => {
                    self.suspend(platform, &message).await?;
                    self.targets.record_error(target.id, &message).await?;
                    report.suspended = true;
                    Ok(JobState::Sleep)
                }
                PlatformError::ClientError { status, message } => {
                    let reason = format!("{status}: {message}");
                    warn!(target_id = %target.id, platform = %platform, %reason, "Target rejected by platform");
                    self.targets.mark_failed(target.id, &reason).await?;
                    metrics::counter!("reelforge_measurement_failed_total", "platform" => platform.as_str())
                        .increment(1);
                    self.event_bus.publish_measurement_event(MeasurementEvent::TargetFailed {
                        target_id: target.id,
                        platform,
                        reason,
                    });
                    report.failed += 1;
                    Ok(JobState::Collect(remaining))
                }
                retryable => {
                    let reason = retryable.to_string();
                    warn!(
                        target_id = %target.id,
                        platform = %platform,
                        attempts = failure.attempts,
                        %reason,
                        "Retries exhausted, target stays due"
                    );
                    self.targets.record_error(target.id, &reason).await?;
                    self.event_bus.publish_measurement_event(MeasurementEvent::CollectionDeferred {
                        target_id: target.id,
                        platform,
                        attempts: failure.attempts,
                        reason,
                    });
                    report.deferred += 1;
                    Ok(JobState::Sleep)
                }
            },
        }
    }

    /// Returns false when the target was already settled.
    async fn save_metrics(&self, target: &MeasurementTarget, metrics: PlatformMetrics) -> Result<bool, MeasurementError> {
        let collected = CollectedMetrics::from_platform(metrics, Utc::now());
        match self.targets.save_metrics(target.id, &collected).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(reason)) => {
                debug!(target_id = %target.id, %reason, "Target already settled, skipping save");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            target_id = %target.id,
            platform = %target.platform,
            window = target.window.as_str(),
            views = collected.metrics.views,
            engagement_rate = collected.engagement_rate,
            "Metrics collected"
        );
        metrics::counter!("reelforge_measurement_collected_total", "platform" => target.platform.as_str())
            .increment(1);
        self.event_bus.publish_measurement_event(MeasurementEvent::MetricsCollected {
            target_id: target.id,
            platform: target.platform,
            window: target.window,
            engagement_rate: collected.engagement_rate,
            collected_at: collected.collected_at,
        });

        if let Some(kind) = target.window.analysis() {
            self.targets.queue_analysis(&target.content_id, kind, target.window).await?;
            self.event_bus.publish_measurement_event(MeasurementEvent::AnalysisQueued {
                content_id: target.content_id.clone(),
                kind,
                window: target.window,
            });
        }
        Ok(true)
    }

    async fn suspend(&self, platform: Platform, message: &str) -> Result<(), MeasurementError> {
        error!(platform = %platform, message, "Platform credentials rejected, suspending collection");
        self.targets.suspend_platform(platform, message).await?;
        metrics::counter!("reelforge_measurement_unauthorized_total", "platform" => platform.as_str()).increment(1);
        self.event_bus.publish_alert(OperatorAlert::PlatformUnauthorized {
            platform,
            message: message.to_string(),
        });
        Ok(())
    }

    fn platform_lock(&self, platform: Platform) -> Arc<Mutex<()>> {
        self.platform_locks.entry(platform).or_default().clone()
    }

    async fn retry_policy(&self) -> Result<RetryPolicy, MeasurementError> {
        let attempts = self.settings.get_count(keys::METRICS_RETRY_MAX_ATTEMPTS).await?;
        let base_ms = self.settings.get_number(keys::METRICS_RETRY_BASE_DELAY_MS).await?;
        Ok(RetryPolicy::new(attempts, Duration::from_millis(base_ms.max(0.0) as u64)))
    }

    async fn poll_interval(&self) -> Duration {
        match self.settings.get_number(keys::MEASUREMENT_POLL_INTERVAL_SEC).await {
            Ok(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs).unwrap_or_else(|_| {
                warn!(secs, "Poll interval out of range, using fallback");
                FALLBACK_POLL_INTERVAL
            }),
            Ok(_) => FALLBACK_POLL_INTERVAL,
            Err(e) => {
                warn!(error = %e, "Could not read poll interval, using fallback");
                FALLBACK_POLL_INTERVAL
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::measurement::{MeasurementWindow, Publication};
    use crate::infrastructure::repositories::InMemoryMeasurementRepository;
    use crate::infrastructure::settings::InMemorySettingsProvider;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    struct FixedAdapter {
        platform: Platform,
        result: Result<PlatformMetrics, PlatformError>,
    }

    #[async_trait]
    impl MetricsAdapter for FixedAdapter {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn fetch_metrics(&self, _target: &MeasurementTarget) -> Result<PlatformMetrics, PlatformError> {
            self.result.clone()
        }
    }

    async fn setup(
        result: Result<PlatformMetrics, PlatformError>,
    ) -> (MeasurementJob, Arc<InMemoryMeasurementRepository>, Vec<MeasurementTarget>) {
        let repo = Arc::new(InMemoryMeasurementRepository::new());
        let publication = Publication {
            id: uuid::Uuid::new_v4(),
            cycle_id: None,
            content_id: "CNT-7".into(),
            account_id: "ACC-1".into(),
            platform: Platform::Tiktok,
            platform_post_id: "tt-99".into(),
            posted_at: Utc::now() - ChronoDuration::days(3),
        };
        let targets = MeasurementTarget::schedule(&publication);
        repo.record_publication(&publication, &targets).await.unwrap();

        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(FixedAdapter {
            platform: Platform::Tiktok,
            result,
        }));
        let job = MeasurementJob::new(
            repo.clone(),
            adapters,
            Arc::new(InMemorySettingsProvider::with_defaults()),
            EventBus::new(64),
        );
        (job, repo, targets)
    }

    #[tokio::test]
    async fn test_only_elapsed_windows_are_collected() {
        let metrics = PlatformMetrics {
            views: 1000,
            likes: 40,
            comments: 5,
            shares: 5,
            ..PlatformMetrics::default()
        };
        let (job, repo, targets) = setup(Ok(metrics)).await;

        let report = job.run_once(Platform::Tiktok).await.unwrap();
        assert_eq!(report.collected, 1);

        let h48 = targets.iter().find(|t| t.window == MeasurementWindow::Hours48).unwrap();
        let stored = repo.find_by_id(h48.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TargetStatus::Collected);
        assert_eq!(repo.collected_metrics(h48.id).unwrap().engagement_rate, 0.05);
        assert_eq!(repo.queued_analyses().len(), 1);

        // Nothing else is due yet.
        assert_eq!(job.run_once(Platform::Tiktok).await.unwrap(), PassReport::default());
    }

    #[tokio::test]
    async fn test_client_error_removes_target_from_due_set() {
        let (job, repo, _) = setup(Err(PlatformError::ClientError {
            status: 404,
            message: "post deleted".into(),
        }))
        .await;

        let report = job.run_once(Platform::Tiktok).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(repo.find_due(Utc::now(), 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_suspends_until_resumed() {
        let (job, repo, _) = setup(Err(PlatformError::Unauthorized("token expired".into()))).await;
        let mut alerts = job.event_bus.subscribe_alerts();

        let report = job.run_once(Platform::Tiktok).await.unwrap();
        assert!(report.suspended);
        assert_eq!(repo.find_due(Utc::now(), 10, None).await.unwrap().len(), 1);
        assert!(matches!(
            alerts.recv().await.unwrap(),
            OperatorAlert::PlatformUnauthorized { platform: Platform::Tiktok, .. }
        ));

        assert!(job.detect_targets(Platform::Tiktok).await.unwrap().is_empty());
        let suspended = repo.find_suspension(Platform::Tiktok).await.unwrap().unwrap();
        assert_eq!(suspended.reason, "token expired");

        assert!(job.resume_platform(Platform::Tiktok).await.unwrap());
        assert!(!job.resume_platform(Platform::Tiktok).await.unwrap());
        assert_eq!(job.detect_targets(Platform::Tiktok).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_suspension_in_the_store_outlives_the_job() {
        let (job, repo, _) = setup(Err(PlatformError::Unauthorized("token expired".into()))).await;
        job.run_once(Platform::Tiktok).await.unwrap();
        drop(job);

        // A fresh job over the same store, as after a restart.
        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(FixedAdapter {
            platform: Platform::Tiktok,
            result: Ok(PlatformMetrics::default()),
        }));
        let restarted = MeasurementJob::new(
            repo.clone(),
            adapters,
            Arc::new(InMemorySettingsProvider::with_defaults()),
            EventBus::new(64),
        );
        assert_eq!(restarted.run_once(Platform::Tiktok).await.unwrap(), PassReport::default());
        assert_eq!(restarted.suspended_platforms().await.unwrap().len(), 1);

        assert!(restarted.resume_platform(Platform::Tiktok).await.unwrap());
        assert_eq!(restarted.run_once(Platform::Tiktok).await.unwrap().collected, 1);
    }

    #[tokio::test]
    async fn test_settled_target_is_not_fetched_again() {
        let (job, repo, targets) = setup(Ok(PlatformMetrics::default())).await;
        let h48 = targets.iter().find(|t| t.window == MeasurementWindow::Hours48).unwrap().clone();
        let stale = repo.find_due(Utc::now(), 10, None).await.unwrap();
        job.run_once(Platform::Tiktok).await.unwrap();

        // A pass that detected the target before the first one saved it.
        let state = job
            .step(Platform::Tiktok, JobState::Collect(stale.into()), &mut PassReport::default())
            .await
            .unwrap();
        assert!(matches!(state, JobState::Collect(ref queue) if queue.is_empty()));
        assert_eq!(repo.find_by_id(h48.id).await.unwrap().unwrap().status, TargetStatus::Collected);
    }

    #[tokio::test]
    async fn test_unrepresentable_poll_interval_falls_back() {
        let settings = Arc::new(InMemorySettingsProvider::with_defaults());
        let job = MeasurementJob::new(
            Arc::new(InMemoryMeasurementRepository::new()),
            AdapterRegistry::new(),
            settings.clone(),
            EventBus::new(8),
        );
        assert_eq!(job.poll_interval().await, Duration::from_secs(300));

        settings.set(keys::MEASUREMENT_POLL_INTERVAL_SEC, serde_json::json!(1e300));
        assert_eq!(job.poll_interval().await, FALLBACK_POLL_INTERVAL);
        settings.set(keys::MEASUREMENT_POLL_INTERVAL_SEC, serde_json::json!("inf"));
        assert_eq!(job.poll_interval().await, FALLBACK_POLL_INTERVAL);
        settings.set(keys::MEASUREMENT_POLL_INTERVAL_SEC, serde_json::json!(2.5));
        assert_eq!(job.poll_interval().await, Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_rate_limit_keeps_target_due() {
        let (job, repo, _) = setup(Err(PlatformError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        }))
        .await;

        let report = job.run_once(Platform::Tiktok).await.unwrap();
        assert_eq!(report.deferred, 1);
        let due = repo.find_due(Utc::now(), 10, None).await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(due[0].last_error.is_some());
    }
}
