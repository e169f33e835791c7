// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Service wiring shared by the daemon and the one-shot operator commands.

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use reelforge_core::application::{
    CostAllocator, CycleEngine, LearningEngine, MeasurementJob, PostingCooldown, Repositories,
};
use reelforge_core::domain::platform::AdapterRegistry;
use reelforge_core::domain::stage::StageRegistry;
use reelforge_core::infrastructure::config::OrchestratorConfigManifest;
use reelforge_core::infrastructure::db::Database;
use reelforge_core::infrastructure::http_metrics_adapter::HttpMetricsAdapter;
use reelforge_core::infrastructure::http_stage_executor::HttpStageExecutor;
use reelforge_core::infrastructure::{EventBus, HumanApprovalGate};

pub struct Services {
    pub db: Option<Database>,
    pub repos: Repositories,
    pub event_bus: EventBus,
    pub learning: Arc<LearningEngine>,
    pub costs: Arc<CostAllocator>,
    pub cooldown: Arc<PostingCooldown>,
    pub approvals: Arc<HumanApprovalGate>,
}

impl Services {
    /// Connect to PostgreSQL using the configured URL.
    pub async fn connect(config: &OrchestratorConfigManifest) -> Result<Self> {
        let url = config.database_url().context("No database URL configured")?;
        let db = Database::connect(&url, config.spec.database.max_connections)
            .await
            .context("Failed to connect to database")?;
        let repos = Repositories::postgres(db.get_pool().clone());
        Ok(Self::assemble(Some(db), repos))
    }

    /// Everything in process memory; state is lost on exit.
    pub fn in_memory() -> Self {
        Self::assemble(None, Repositories::in_memory())
    }

    fn assemble(db: Option<Database>, repos: Repositories) -> Self {
        let event_bus = EventBus::with_default_capacity();
        let learning = Arc::new(LearningEngine::new(
            repos.learnings.clone(),
            repos.settings.clone(),
            event_bus.clone(),
        ));
        let costs = Arc::new(CostAllocator::new(repos.ledger.clone(), repos.settings.clone()));
        let cooldown = Arc::new(PostingCooldown::new(
            repos.measurements.clone(),
            repos.settings.clone(),
        ));
        let approvals = Arc::new(HumanApprovalGate::new(repos.plans.clone()));

        Self {
            db,
            repos,
            event_bus,
            learning,
            costs,
            cooldown,
            approvals,
        }
    }

    pub fn cycle_engine(&self, config: &OrchestratorConfigManifest) -> Result<CycleEngine> {
        let stages = stage_registry(config)?;
        Ok(CycleEngine::new(
            self.repos.engine(),
            self.learning.clone(),
            self.costs.clone(),
            self.cooldown.clone(),
            self.repos.settings.clone(),
            stages,
            self.event_bus.clone(),
        )
        .with_approval_gate(self.approvals.clone(), config.spec.cycle.approval_timeout))
    }

    pub fn measurement_job(&self, config: &OrchestratorConfigManifest) -> Result<MeasurementJob> {
        Ok(MeasurementJob::new(
            self.repos.measurements.clone(),
            adapter_registry(config)?,
            self.repos.settings.clone(),
            self.event_bus.clone(),
        ))
    }
}

/// One `HttpStageExecutor` per stage. Every stage must be routable.
pub fn stage_registry(config: &OrchestratorConfigManifest) -> Result<StageRegistry> {
    let unrouted = config.unrouted_stages();
    if !unrouted.is_empty() {
        let names: Vec<&str> = unrouted.iter().map(|s| s.as_str()).collect();
        bail!(
            "No endpoint configured for stages: {} (set spec.stages.base_url or spec.stages.endpoints)",
            names.join(", ")
        );
    }

    let client = HttpStageExecutor::build_client(config.spec.stages.timeout)?;
    let policy = config.spec.stages.retry.policy();
    let mut registry = StageRegistry::new();
    for stage in reelforge_core::domain::cycle::CycleStage::ALL {
        if let Some(endpoint) = config.stage_endpoint(stage) {
            let executor = HttpStageExecutor::new(client.clone(), endpoint).with_retry_policy(policy.clone());
            registry.register(stage, Arc::new(executor));
        }
    }
    Ok(registry)
}

/// One `HttpMetricsAdapter` per enabled platform.
pub fn adapter_registry(config: &OrchestratorConfigManifest) -> Result<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    for platform in config.enabled_platforms() {
        let client = reqwest::Client::builder()
            .timeout(platform.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let mut adapter = HttpMetricsAdapter::new(client, platform.platform, platform.endpoint.clone());
        if let Some(token) = platform
            .credential()
            .with_context(|| format!("Missing credentials for {}", platform.platform))?
        {
            adapter = adapter.with_token(token);
        }
        registry.register(Arc::new(adapter));
    }
    Ok(registry)
}
