// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the publish → measure pipeline
//!
//! 1. Publications reported by the `post` stage schedule measurement targets
//! 2. Posting cooldowns feed the next cycle's `post` context
//! 3. The measurement job collects due windows and queues follow-up analyses
//! 4. Credential and transient failures are contained per platform
//! 5. One collection in flight per platform, platforms in parallel

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::json;

use common::{Harness, Script};
use reelforge_core::application::{MeasurementJob, PassReport};
use reelforge_core::domain::cycle::{CycleStage, CycleStatus};
use reelforge_core::domain::events::OperatorAlert;
use reelforge_core::domain::measurement::{
    AnalysisKind, MeasurementTarget, Platform, PlatformMetrics, Publication, TargetStatus,
};
use reelforge_core::domain::platform::{AdapterRegistry, MetricsAdapter, PlatformError};
use reelforge_core::domain::repository::MeasurementRepository;
use reelforge_core::domain::settings::keys;
use reelforge_core::domain::stage::StageOutput;
use reelforge_core::infrastructure::event_bus::DomainEvent;

fn publication(account: &str, post_id: &str, posted_ago: ChronoDuration) -> Publication {
    Publication {
        id: uuid::Uuid::new_v4(),
        cycle_id: None,
        content_id: format!("content-{post_id}"),
        account_id: account.to_string(),
        platform: Platform::Tiktok,
        platform_post_id: post_id.to_string(),
        posted_at: Utc::now() - posted_ago,
    }
}

/// Replays one result for every call and counts them.
struct CountingAdapter {
    result: Result<PlatformMetrics, PlatformError>,
    calls: AtomicUsize,
}

impl CountingAdapter {
    fn new(result: Result<PlatformMetrics, PlatformError>) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MetricsAdapter for CountingAdapter {
    fn platform(&self) -> Platform {
        Platform::Tiktok
    }

    async fn fetch_metrics(&self, _target: &MeasurementTarget) -> Result<PlatformMetrics, PlatformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

fn job(harness: &Harness, adapter: Arc<CountingAdapter>) -> MeasurementJob {
    let mut adapters = AdapterRegistry::new();
    adapters.register(adapter);
    MeasurementJob::new(
        harness.measurements.clone(),
        adapters,
        harness.settings.clone(),
        harness.event_bus.clone(),
    )
}

fn healthy_metrics() -> PlatformMetrics {
    PlatformMetrics {
        views: 2000,
        likes: 150,
        comments: 30,
        shares: 20,
        ..PlatformMetrics::default()
    }
}

#[tokio::test]
async fn test_posted_content_is_measured_across_all_windows() {
    let harness = Harness::new();
    let script = Script::happy_path();
    script.stage(CycleStage::Post).push(Ok(StageOutput {
        summary: "posted".to_string(),
        publications: vec![publication("acct-main", "tt-100", ChronoDuration::days(31))],
        ..StageOutput::default()
    }));
    let engine = harness.engine(script.registry());

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.status, CycleStatus::Completed);

    let targets = harness.measurements.targets();
    assert_eq!(targets.len(), 3);
    assert!(targets.iter().all(|t| t.status == TargetStatus::Pending));

    let adapter = CountingAdapter::new(Ok(healthy_metrics()));
    let job = job(&harness, adapter.clone());

    let pass = job.run_once(Platform::Tiktok).await.unwrap();

    assert_eq!(pass.collected, 3);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
    for target in harness.measurements.targets() {
        assert_eq!(target.status, TargetStatus::Collected);
        let collected = harness.measurements.collected_metrics(target.id).unwrap();
        assert_eq!(collected.engagement_rate, 0.1);
    }

    let mut kinds: Vec<AnalysisKind> = harness.measurements.queued_analyses().iter().map(|a| a.kind).collect();
    kinds.sort_by_key(|k| k.as_str());
    assert_eq!(kinds, vec![AnalysisKind::Cumulative, AnalysisKind::Micro]);

    assert_eq!(job.run_once(Platform::Tiktok).await.unwrap(), PassReport::default());
}

#[tokio::test]
async fn test_invalid_publication_fails_the_cycle() {
    let harness = Harness::new();
    let script = Script::happy_path();
    script.stage(CycleStage::Post).push(Ok(StageOutput {
        summary: "posted".to_string(),
        publications: vec![publication("", "tt-101", ChronoDuration::hours(1))],
        ..StageOutput::default()
    }));
    let engine = harness.engine(script.registry());

    assert!(engine.run_cycle().await.is_err());
    assert!(harness.measurements.targets().is_empty());
}

#[tokio::test]
async fn test_post_stage_sees_account_cooldowns() {
    let harness = Harness::new();
    let script = Script::happy_path();
    script.stage(CycleStage::Post).push(Ok(StageOutput {
        summary: "posted twice".to_string(),
        publications: vec![
            publication("acct-rested", "tt-200", ChronoDuration::days(2)),
            publication("acct-busy", "tt-201", ChronoDuration::hours(1)),
        ],
        ..StageOutput::default()
    }));
    let engine = harness.engine(script.registry());

    engine.run_cycle().await.unwrap();
    engine.run_cycle().await.unwrap();

    let contexts = script.stage(CycleStage::Post).contexts();
    assert!(contexts[0].platform_availability.is_empty());

    let availability = &contexts[1].platform_availability;
    assert_eq!(availability.len(), 2);
    let rested = availability.iter().find(|a| a.account_id == "acct-rested").unwrap();
    assert!(rested.can_post);
    assert_eq!(rested.remaining_minutes, 0);
    let busy = availability.iter().find(|a| a.account_id == "acct-busy").unwrap();
    assert!(!busy.can_post);
    assert!((179..=180).contains(&busy.remaining_minutes));

    // Only the post stage gets availability.
    assert!(script.stage(CycleStage::Produce).contexts()[1]
        .platform_availability
        .is_empty());

    let status = harness.cooldown.check("acct-busy", Platform::Tiktok).await.unwrap();
    assert!(!status.can_post);
    assert!(status.next_available_at.is_some());
}

#[tokio::test]
async fn test_unauthorized_platform_is_suspended_until_resumed() {
    let harness = Harness::new();
    let posted = publication("acct-main", "tt-300", ChronoDuration::days(8));
    let targets = MeasurementTarget::schedule(&posted);
    harness.measurements.record_publication(&posted, &targets).await.unwrap();

    let adapter = CountingAdapter::new(Err(PlatformError::Unauthorized("token revoked".to_string())));
    let job = job(&harness, adapter.clone());
    let mut events = harness.event_bus.subscribe();

    let pass = job.run_once(Platform::Tiktok).await.unwrap();

    assert!(pass.suspended);
    assert_eq!(pass.collected, 0);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1, "credential errors are not retried");
    let suspended = job.suspended_platforms().await.unwrap();
    assert_eq!(suspended.len(), 1);
    assert_eq!(suspended[0].platform, Platform::Tiktok);
    assert_eq!(suspended[0].reason, "token revoked");

    let mut saw_alert = false;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::Alert(OperatorAlert::PlatformUnauthorized { platform, .. }) = event {
            saw_alert = platform == Platform::Tiktok;
        }
    }
    assert!(saw_alert);

    // Suspended platforms are skipped entirely.
    assert_eq!(job.run_once(Platform::Tiktok).await.unwrap(), PassReport::default());
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);

    // The suspension is a store row, so an operator can clear it from
    // another process.
    assert!(harness.measurements.find_suspension(Platform::Tiktok).await.unwrap().is_some());
    assert!(job.resume_platform(Platform::Tiktok).await.unwrap());
    assert!(!job.resume_platform(Platform::Tiktok).await.unwrap());
    let due = job.detect_targets(Platform::Tiktok).await.unwrap();
    assert_eq!(due.len(), 2);
}

#[tokio::test]
async fn test_transient_failures_leave_target_due() {
    let harness = Harness::new();
    harness.settings.set(keys::METRICS_RETRY_BASE_DELAY_MS, json!(1));
    let posted = publication("acct-main", "tt-400", ChronoDuration::days(3));
    let targets = MeasurementTarget::schedule(&posted);
    harness.measurements.record_publication(&posted, &targets).await.unwrap();

    let adapter = CountingAdapter::new(Err(PlatformError::Transient("502 bad gateway".to_string())));
    let job = job(&harness, adapter.clone());

    let pass = job.run_once(Platform::Tiktok).await.unwrap();

    assert_eq!(pass.deferred, 1);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
    let due = job.detect_targets(Platform::Tiktok).await.unwrap();
    assert_eq!(due.len(), 1);
    assert!(due[0].last_error.as_deref().unwrap_or_default().contains("502"));
}

#[tokio::test]
async fn test_measurement_worker_stops_on_shutdown() {
    let harness = Harness::new();
    let posted = publication("acct-main", "tt-500", ChronoDuration::days(3));
    let targets = MeasurementTarget::schedule(&posted);
    harness.measurements.record_publication(&posted, &targets).await.unwrap();

    let job = Arc::new(job(&harness, CountingAdapter::new(Ok(healthy_metrics()))));
    let token = job.shutdown_token();
    let handles = job.clone().start();
    assert_eq!(handles.len(), 1);

    let mut collected = false;
    for _ in 0..200 {
        if harness
            .measurements
            .targets()
            .iter()
            .any(|t| t.status == TargetStatus::Collected)
        {
            collected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(collected, "worker should collect on its first pass");

    token.cancel();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop")
            .unwrap();
    }
}

/// Sleeps inside every fetch and records how many fetches overlap.
#[derive(Default)]
struct FetchTracker {
    in_flight: Mutex<HashMap<Platform, usize>>,
    platform_peak: Mutex<HashMap<Platform, usize>>,
    calls: Mutex<HashMap<Platform, usize>>,
    total_in_flight: AtomicUsize,
    total_peak: AtomicUsize,
}

struct SlowAdapter {
    platform: Platform,
    tracker: Arc<FetchTracker>,
}

#[async_trait]
impl MetricsAdapter for SlowAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn fetch_metrics(&self, _target: &MeasurementTarget) -> Result<PlatformMetrics, PlatformError> {
        let tracker = &self.tracker;
        *tracker.calls.lock().entry(self.platform).or_default() += 1;
        {
            let mut in_flight = tracker.in_flight.lock();
            let current = in_flight.entry(self.platform).or_default();
            *current += 1;
            let mut peak = tracker.platform_peak.lock();
            let platform_peak = peak.entry(self.platform).or_default();
            *platform_peak = (*platform_peak).max(*current);
        }
        let total = tracker.total_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        tracker.total_peak.fetch_max(total, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(5)).await;

        tracker.total_in_flight.fetch_sub(1, Ordering::SeqCst);
        *tracker.in_flight.lock().entry(self.platform).or_default() -= 1;
        Ok(healthy_metrics())
    }
}

#[tokio::test(start_paused = true)]
async fn test_one_collection_in_flight_per_platform() {
    let harness = Harness::new();
    let mut posts = vec![
        publication("acct-main", "tt-600", ChronoDuration::days(3)),
        publication("acct-main", "tt-601", ChronoDuration::days(3)),
    ];
    let mut video = publication("acct-main", "yt-600", ChronoDuration::days(3));
    video.platform = Platform::Youtube;
    posts.push(video);
    for posted in &posts {
        let targets = MeasurementTarget::schedule(posted);
        harness.measurements.record_publication(posted, &targets).await.unwrap();
    }

    let tracker = Arc::new(FetchTracker::default());
    let mut adapters = AdapterRegistry::new();
    for platform in [Platform::Tiktok, Platform::Youtube] {
        adapters.register(Arc::new(SlowAdapter {
            platform,
            tracker: tracker.clone(),
        }));
    }
    let job = MeasurementJob::new(
        harness.measurements.clone(),
        adapters,
        harness.settings.clone(),
        harness.event_bus.clone(),
    );

    // Two overlapping tiktok passes, as when a manual run meets the worker.
    let (first, second, youtube) = tokio::join!(
        job.run_once(Platform::Tiktok),
        job.run_once(Platform::Tiktok),
        job.run_once(Platform::Youtube),
    );
    let collected = first.unwrap().collected + second.unwrap().collected + youtube.unwrap().collected;

    assert_eq!(collected, 3);
    assert_eq!(tracker.platform_peak.lock().get(&Platform::Tiktok), Some(&1));
    assert_eq!(tracker.platform_peak.lock().get(&Platform::Youtube), Some(&1));
    assert_eq!(tracker.total_peak.load(Ordering::SeqCst), 2, "platforms should collect in parallel");
    assert_eq!(tracker.calls.lock().get(&Platform::Tiktok), Some(&2), "each target is fetched once");
    assert_eq!(tracker.calls.lock().get(&Platform::Youtube), Some(&1));
    assert!(harness.measurements.find_due(Utc::now(), 10, None).await.unwrap().is_empty());
}
