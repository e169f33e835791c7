// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the integration tests: in-memory repositories wired the
//! way the daemon wires them, and scripted stage executors.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use reelforge_core::application::{CostAllocator, CycleEngine, EngineRepositories, LearningEngine, PostingCooldown};
use reelforge_core::domain::cycle::CycleStage;
use reelforge_core::domain::quality::QualityScores;
use reelforge_core::domain::stage::{ApprovalVerdict, StageContext, StageError, StageExecutor, StageOutput, StageRegistry};
use reelforge_core::infrastructure::repositories::{
    InMemoryCycleRepository, InMemoryLearningRepository, InMemoryMeasurementRepository, InMemoryPlanRepository,
    InMemorySpendLedger, InMemoryThoughtLogRepository,
};
use reelforge_core::infrastructure::settings::InMemorySettingsProvider;
use reelforge_core::infrastructure::EventBus;

pub struct Harness {
    pub cycles: Arc<InMemoryCycleRepository>,
    pub plans: Arc<InMemoryPlanRepository>,
    pub learnings: Arc<InMemoryLearningRepository>,
    pub measurements: Arc<InMemoryMeasurementRepository>,
    pub thought_logs: Arc<InMemoryThoughtLogRepository>,
    pub ledger: Arc<InMemorySpendLedger>,
    pub settings: Arc<InMemorySettingsProvider>,
    pub event_bus: EventBus,
    pub learning: Arc<LearningEngine>,
    pub costs: Arc<CostAllocator>,
    pub cooldown: Arc<PostingCooldown>,
}

impl Harness {
    pub fn new() -> Self {
        let cycles = Arc::new(InMemoryCycleRepository::new());
        let plans = Arc::new(InMemoryPlanRepository::new());
        let learnings = Arc::new(InMemoryLearningRepository::new());
        let measurements = Arc::new(InMemoryMeasurementRepository::new());
        let thought_logs = Arc::new(InMemoryThoughtLogRepository::new());
        let ledger = Arc::new(InMemorySpendLedger::new());
        let settings = Arc::new(InMemorySettingsProvider::with_defaults());
        let event_bus = EventBus::with_default_capacity();

        let learning = Arc::new(LearningEngine::new(learnings.clone(), settings.clone(), event_bus.clone()));
        let costs = Arc::new(CostAllocator::new(ledger.clone(), settings.clone()));
        let cooldown = Arc::new(PostingCooldown::new(measurements.clone(), settings.clone()));

        Self {
            cycles,
            plans,
            learnings,
            measurements,
            thought_logs,
            ledger,
            settings,
            event_bus,
            learning,
            costs,
            cooldown,
        }
    }

    pub fn repositories(&self) -> EngineRepositories {
        EngineRepositories {
            cycles: self.cycles.clone(),
            plans: self.plans.clone(),
            thought_logs: self.thought_logs.clone(),
            measurements: self.measurements.clone(),
        }
    }

    pub fn engine(&self, stages: StageRegistry) -> CycleEngine {
        CycleEngine::new(
            self.repositories(),
            self.learning.clone(),
            self.costs.clone(),
            self.cooldown.clone(),
            self.settings.clone(),
            stages,
            self.event_bus.clone(),
        )
    }
}

/// Replays queued results, then falls back to a fixed output. Every context
/// it receives is kept for assertions.
pub struct ScriptedStage {
    script: Mutex<VecDeque<Result<StageOutput, StageError>>>,
    fallback: StageOutput,
    seen: Mutex<Vec<StageContext>>,
}

impl ScriptedStage {
    pub fn new(fallback: StageOutput) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, result: Result<StageOutput, StageError>) {
        self.script.lock().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn contexts(&self) -> Vec<StageContext> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl StageExecutor for ScriptedStage {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        self.seen.lock().push(ctx.clone());
        match self.script.lock().pop_front() {
            Some(result) => result,
            None => Ok(self.fallback.clone()),
        }
    }
}

/// One scripted executor per stage, all succeeding by default.
pub struct Script {
    stages: HashMap<CycleStage, Arc<ScriptedStage>>,
}

impl Script {
    pub fn happy_path() -> Self {
        let stages = CycleStage::ALL
            .into_iter()
            .map(|stage| (stage, Arc::new(ScriptedStage::new(default_output(stage)))))
            .collect();
        Self { stages }
    }

    pub fn stage(&self, stage: CycleStage) -> Arc<ScriptedStage> {
        self.stages[&stage].clone()
    }

    pub fn registry(&self) -> StageRegistry {
        let mut registry = StageRegistry::new();
        for (stage, executor) in &self.stages {
            registry.register(*stage, executor.clone());
        }
        registry
    }
}

pub fn default_output(stage: CycleStage) -> StageOutput {
    let mut output = StageOutput {
        summary: format!("{stage} done"),
        payload: json!({ "stage": stage.as_str() }),
        ..StageOutput::default()
    };
    match stage {
        CycleStage::PlanContent => {
            output.payload = json!({ "items": [{ "topic": "morning routine", "platform": "tiktok" }] });
        }
        CycleStage::ApprovePlan => output.verdict = Some(approved()),
        _ => {}
    }
    output
}

pub fn approved() -> ApprovalVerdict {
    ApprovalVerdict {
        approved: true,
        rejection_category: None,
        feedback: None,
    }
}

pub fn rejection(category: Option<&str>, feedback: &str) -> StageOutput {
    StageOutput {
        summary: "plan rejected".to_string(),
        verdict: Some(ApprovalVerdict {
            approved: false,
            rejection_category: category.map(str::to_string),
            feedback: Some(feedback.to_string()),
        }),
        ..StageOutput::default()
    }
}

pub fn uniform_quality(score: f64) -> QualityScores {
    QualityScores {
        visual_quality: score,
        audio_quality: score,
        script_coherence: score,
        engagement_potential: score,
        brand_consistency: score,
        technical_compliance: score,
    }
}
