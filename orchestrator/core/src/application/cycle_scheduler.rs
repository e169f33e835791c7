// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cycle Scheduler - daemon loop driving the cycle engine
//!
//! On every tick the scheduler first retries deferred cycles (their budget
//! gate is re-evaluated by the engine) and then starts one new cycle. While a
//! deferred cycle is still blocked by the budget, no new cycle is started:
//! it would only defer as well.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Periodic trigger for `CycleEngine::run_cycle`

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::cycle_engine::{CycleEngine, CycleReport, EngineError};
use crate::domain::cycle::CycleStatus;

/// Outcome of one scheduler tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub resumed: Vec<CycleReport>,
    pub started: Option<CycleReport>,
    /// Deferred cycles still waiting on budget after this tick.
    pub still_deferred: usize,
}

pub struct CycleScheduler {
    engine: Arc<CycleEngine>,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl CycleScheduler {
    pub fn new(engine: Arc<CycleEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "Starting cycle scheduler");

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.tick().await {
                        Ok(report) => info!(
                            resumed = report.resumed.len(),
                            started = report.started.as_ref().map(|r| r.cycle_number),
                            still_deferred = report.still_deferred,
                            "Scheduler tick finished"
                        ),
                        Err(e) => error!(error = %e, "Scheduler tick failed"),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping cycle scheduler");
                    break;
                }
            }
        }
    }

    /// One pass: resume deferred cycles, then start a new one if budget allows.
    pub async fn tick(&self) -> Result<TickReport, EngineError> {
        let mut report = TickReport::default();

        for cycle in self.engine.deferred_cycles().await? {
            if self.shutdown_token.is_cancelled() {
                return Ok(report);
            }
            match self.engine.resume_cycle(cycle.id).await {
                Ok(resumed) => {
                    if resumed.status == CycleStatus::Deferred {
                        report.still_deferred += 1;
                    }
                    report.resumed.push(resumed);
                }
                Err(EngineError::AlreadyRunning) => {
                    debug!("A cycle is already running, skipping tick");
                    return Ok(report);
                }
                Err(e) => warn!(cycle_id = %cycle.id, error = %e, "Resuming deferred cycle failed"),
            }
        }

        if report.still_deferred > 0 {
            info!(
                still_deferred = report.still_deferred,
                "Budget still exhausted, not starting a new cycle"
            );
            return Ok(report);
        }

        match self.engine.run_cycle().await {
            Ok(started) => report.started = Some(started),
            Err(EngineError::AlreadyRunning) => debug!("A cycle is already running, skipping tick"),
            Err(e) => return Err(e),
        }

        Ok(report)
    }
}
