// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cycle Engine
//!
//! Executes cycles over the graph defined in `domain::cycle_graph`. The engine
//! owns I/O only: it builds stage context, invokes the registered
//! [`StageExecutor`](crate::domain::stage::StageExecutor), records the thought
//! log and spend, applies the stage's structured output (plans, learnings,
//! publications), and asks the pure transition function where to go next.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Cycle control loop
//! - **Integration:** Engine → StageRegistry → Learning Engine / Cost Allocator /
//!   Posting Cooldown → Repositories → EventBus
//!
//! ## Invariants
//!
//! - At most one cycle runs per engine at a time ([`EngineError::AlreadyRunning`]).
//! - The cycle is re-read before every stage; a cycle flipped to `failed` by an
//!   operator is never advanced again. Cycle repositories refuse to overwrite
//!   a terminal row, which closes the remaining window.
//! - The budget gate is evaluated, and the production estimate committed,
//!   before `produce` starts. A blocked gate defers the cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::application::cost_allocator::{BudgetDecision, CostAllocator, CostError};
use crate::application::learning_engine::{LearningEngine, LearningError, SweepReport};
use crate::application::posting_cooldown::{CooldownError, PostingCooldown};
use crate::domain::cycle::{Cycle, CycleError, CycleId, CycleStage, CycleStatus};
use crate::domain::cycle_graph::{next_transition, GraphError, LoopState, StageOutcome, Transition};
use crate::domain::events::{CycleEvent, OperatorAlert};
use crate::domain::plan::Plan;
use crate::domain::quality::{score_quality, QualityScores, QualityVerdict, QualityWeights};
use crate::domain::repository::{
    CycleRepository, MeasurementRepository, PlanRepository, RepositoryError, ThoughtLogRepository,
};
use crate::domain::revision::{is_valid_rejection_category, rejection_explanation, RejectionCategory};
use crate::domain::measurement::{MeasurementTarget, Publication};
use crate::domain::settings::{keys, SettingsError, SettingsProvider};
use crate::domain::stage::{LearningBrief, RevisionNote, StageContext, StageError, StageOutput, StageRegistry};
use crate::domain::thought_log::ThoughtLogEntry;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::human_approval::{HumanApprovalGate, HumanDecision};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("A cycle is already running")]
    AlreadyRunning,

    #[error("Cycle {0} not found")]
    CycleNotFound(CycleId),

    #[error("Cycle {id} is {status}; only deferred cycles can be resumed")]
    NotResumable { id: CycleId, status: CycleStatus },

    #[error("Human approval is required but no approval gate is configured")]
    ApprovalGateUnavailable,

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: CycleStage,
        #[source]
        source: StageError,
    },

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Learning(#[from] LearningError),

    #[error(transparent)]
    Cost(#[from] CostError),

    #[error(transparent)]
    Cooldown(#[from] CooldownError),
}

fn invalid(stage: CycleStage, message: impl Into<String>) -> EngineError {
    EngineError::Stage {
        stage,
        source: StageError::Validation(message.into()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    pub cycle_number: i64,
    pub status: CycleStatus,
    pub stages_run: Vec<CycleStage>,
    pub revisions: u32,
    pub force_approved: bool,
    pub cost_usd: f64,
    pub sweep: Option<SweepReport>,
}

/// Repositories the engine reads and writes.
#[derive(Clone)]
pub struct EngineRepositories {
    pub cycles: Arc<dyn CycleRepository>,
    pub plans: Arc<dyn PlanRepository>,
    pub thought_logs: Arc<dyn ThoughtLogRepository>,
    pub measurements: Arc<dyn MeasurementRepository>,
}

#[derive(Default)]
struct RunState {
    previous: HashMap<String, serde_json::Value>,
    revision: Option<RevisionNote>,
    feedback: Option<String>,
    stages_run: Vec<CycleStage>,
    revisions: u32,
    force_approved: bool,
    cost_usd: f64,
    production_estimate: Option<f64>,
    sweep: Option<SweepReport>,
}

impl RunState {
    /// Rebuild what a deferred cycle persisted before it parked.
    fn restore(cycle: &Cycle) -> Self {
        let previous = cycle
            .summary
            .get("outputs")
            .and_then(|v| v.as_object())
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Self {
            previous,
            production_estimate: cycle.summary.get("production_estimate_usd").and_then(|v| v.as_f64()),
            revisions: cycle
                .summary
                .get("revisions")
                .and_then(|v| v.as_u64())
                .map(|n| n as u32)
                .unwrap_or(0),
            force_approved: cycle
                .summary
                .get("force_approved")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            ..Self::default()
        }
    }

    fn write_summary(&self, cycle: &mut Cycle) {
        cycle.set_summary_field(
            "outputs",
            serde_json::Value::Object(self.previous.clone().into_iter().collect()),
        );
        cycle.set_summary_field("revisions", self.revisions.into());
        cycle.set_summary_field("force_approved", self.force_approved.into());
        cycle.set_summary_field("cost_usd", self.cost_usd.into());
        if let Some(estimate) = self.production_estimate {
            cycle.set_summary_field("production_estimate_usd", estimate.into());
        }
        if let Some(sweep) = &self.sweep {
            if let Ok(value) = serde_json::to_value(sweep) {
                cycle.set_summary_field("learning_sweep", value);
            }
        }
    }
}

enum Step {
    Next(CycleStage),
    Finished(CycleReport),
}

pub struct CycleEngine {
    repos: EngineRepositories,
    learning: Arc<LearningEngine>,
    costs: Arc<CostAllocator>,
    cooldown: Arc<PostingCooldown>,
    settings: Arc<dyn SettingsProvider>,
    stages: StageRegistry,
    event_bus: EventBus,
    approval_gate: Option<Arc<HumanApprovalGate>>,
    approval_timeout: Duration,
    run_guard: Mutex<()>,
}

impl CycleEngine {
    pub fn new(
        repos: EngineRepositories,
        learning: Arc<LearningEngine>,
        costs: Arc<CostAllocator>,
        cooldown: Arc<PostingCooldown>,
        settings: Arc<dyn SettingsProvider>,
        stages: StageRegistry,
        event_bus: EventBus,
    ) -> Self {
        Self {
            repos,
            learning,
            costs,
            cooldown,
            settings,
            stages,
            event_bus,
            approval_gate: None,
            approval_timeout: Duration::from_secs(24 * 3600),
            run_guard: Mutex::new(()),
        }
    }

    pub fn with_approval_gate(mut self, gate: Arc<HumanApprovalGate>, timeout: Duration) -> Self {
        self.approval_gate = Some(gate);
        self.approval_timeout = timeout;
        self
    }

    /// Start a fresh cycle and drive it until it completes, fails, defers or is
    /// cancelled.
    pub async fn run_cycle(&self) -> Result<CycleReport, EngineError> {
        let _guard = self.run_guard.try_lock().map_err(|_| EngineError::AlreadyRunning)?;

        let cycle = self.repos.cycles.create().await?;
        info!(cycle_id = %cycle.id, cycle_number = cycle.cycle_number, "Cycle started");
        metrics::counter!("reelforge_cycles_started_total").increment(1);
        self.event_bus.publish_cycle_event(CycleEvent::CycleStarted {
            cycle_id: cycle.id,
            cycle_number: cycle.cycle_number,
            started_at: cycle.started_at,
        });

        self.drive(cycle.id, CycleStage::SetStrategy, RunState::default()).await
    }

    /// Continue a deferred cycle from `produce`, re-evaluating the budget gate.
    pub async fn resume_cycle(&self, id: CycleId) -> Result<CycleReport, EngineError> {
        let _guard = self.run_guard.try_lock().map_err(|_| EngineError::AlreadyRunning)?;

        let cycle = self
            .repos
            .cycles
            .find_by_id(id)
            .await?
            .ok_or(EngineError::CycleNotFound(id))?;
        if cycle.status != CycleStatus::Deferred {
            return Err(EngineError::NotResumable {
                id,
                status: cycle.status,
            });
        }

        info!(cycle_id = %id, "Resuming deferred cycle");
        self.event_bus.publish_cycle_event(CycleEvent::CycleResumed {
            cycle_id: id,
            resumed_at: Utc::now(),
        });
        self.drive(id, CycleStage::Produce, RunState::restore(&cycle)).await
    }

    /// Flip a non-terminal cycle to `failed`. Safe to call while the cycle runs;
    /// the engine stops before its next stage.
    pub async fn cancel_cycle(&self, id: CycleId, reason: &str) -> Result<Cycle, EngineError> {
        let mut cycle = self
            .repos
            .cycles
            .find_by_id(id)
            .await?
            .ok_or(EngineError::CycleNotFound(id))?;
        cycle.fail(format!("cancelled: {reason}"))?;
        self.repos.cycles.save(&cycle).await?;

        warn!(cycle_id = %id, reason, "Cycle cancelled by operator");
        self.announce_failure(&cycle, reason);
        Ok(cycle)
    }

    pub async fn find_cycle(&self, id: CycleId) -> Result<Option<Cycle>, EngineError> {
        Ok(self.repos.cycles.find_by_id(id).await?)
    }

    /// Deferred cycles, oldest first.
    pub async fn deferred_cycles(&self) -> Result<Vec<Cycle>, EngineError> {
        let mut cycles = self.repos.cycles.find_by_status(CycleStatus::Deferred).await?;
        cycles.sort_by_key(|c| c.id);
        Ok(cycles)
    }

    async fn drive(&self, cycle_id: CycleId, start: CycleStage, mut run: RunState) -> Result<CycleReport, EngineError> {
        let mut stage = start;
        loop {
            match self.step(cycle_id, stage, &mut run).await {
                Ok(Step::Next(next)) => stage = next,
                Ok(Step::Finished(report)) => return Ok(report),
                Err(e) => {
                    self.fail_cycle(cycle_id, &e.to_string()).await;
                    return Err(e);
                }
            }
        }
    }

    async fn step(&self, cycle_id: CycleId, stage: CycleStage, run: &mut RunState) -> Result<Step, EngineError> {
        let Some(mut cycle) = self.load_live(cycle_id).await? else {
            return self.halted(cycle_id, run).await;
        };

        if stage == CycleStage::Produce {
            if let BudgetDecision::Blocked {
                current_usd,
                task_cost_usd,
                limit_usd,
            } = self.costs.reserve_production(run.production_estimate, Utc::now()).await?
            {
                let (_, loop_state) = self.loop_state(cycle_id).await?;
                let transition = next_transition(stage, StageOutcome::BudgetBlocked, loop_state)?;
                debug!(cycle_id = %cycle_id, ?transition, "Budget gate transition");
                self.event_bus.publish_alert(OperatorAlert::BudgetExceeded {
                    cycle_id,
                    current_spend_usd: current_usd,
                    task_cost_usd,
                    monthly_limit_usd: limit_usd,
                });
                let reason = format!(
                    "monthly budget: {current_usd:.2} + {task_cost_usd:.2} exceeds {limit_usd:.2} USD"
                );
                return self.defer(cycle, reason, run).await;
            }
        }

        cycle.enter_stage(stage)?;
        if !self.persist(&cycle).await? {
            return self.halted(cycle_id, run).await;
        }

        let output = self.invoke(&cycle, stage, run).await?;
        run.stages_run.push(stage);
        run.previous.insert(stage.as_str().to_string(), output.payload.clone());

        let outcome = self.apply_output(&cycle, stage, &output, run).await?;
        let (plan, loop_state) = self.loop_state(cycle_id).await?;
        let transition = next_transition(stage, outcome, loop_state)?;
        debug!(cycle_id = %cycle_id, stage = %stage, ?outcome, ?transition, "Stage transition");

        self.follow(cycle_id, stage, transition, plan, run).await
    }

    async fn follow(
        &self,
        cycle_id: CycleId,
        from: CycleStage,
        transition: Transition,
        plan: Option<Plan>,
        run: &mut RunState,
    ) -> Result<Step, EngineError> {
        match transition {
            Transition::Goto { stage } => {
                if from == CycleStage::ApprovePlan {
                    run.revision = None;
                }
                Ok(Step::Next(stage))
            }
            Transition::Revise { target, category } => {
                let mut plan = plan.ok_or_else(|| invalid(from, "no plan to revise"))?;
                let feedback = run.feedback.take();
                plan.reject(category, feedback.clone());
                self.repos.plans.save(&plan).await?;
                run.revisions += 1;

                let explanation = rejection_explanation(category);
                info!(
                    cycle_id = %cycle_id,
                    plan_id = %plan.id,
                    category = category.map(|c| c.as_str()).unwrap_or("unspecified"),
                    target = %target,
                    revision_count = plan.revision_count,
                    "{}", explanation
                );
                metrics::counter!(
                    "reelforge_plan_revisions_total",
                    "category" => category.map(|c| c.as_str()).unwrap_or("unspecified")
                )
                .increment(1);
                self.event_bus.publish_cycle_event(CycleEvent::PlanRevised {
                    cycle_id,
                    plan_id: plan.id,
                    category,
                    target,
                    revision_count: plan.revision_count,
                });

                run.revision = Some(RevisionNote {
                    category,
                    explanation: explanation.to_string(),
                    feedback,
                    revision_count: plan.revision_count,
                });
                Ok(Step::Next(target))
            }
            Transition::ForceApprove { next } => {
                let mut plan = plan.ok_or_else(|| invalid(from, "no plan to force-approve"))?;
                plan.force_approve();
                self.repos.plans.save(&plan).await?;
                run.force_approved = true;
                run.revision = None;
                run.feedback = None;

                warn!(
                    cycle_id = %cycle_id,
                    plan_id = %plan.id,
                    revision_count = plan.revision_count,
                    "Revision limit reached, plan force-approved"
                );
                metrics::counter!("reelforge_force_approvals_total").increment(1);
                self.event_bus.publish_cycle_event(CycleEvent::PlanForceApproved {
                    cycle_id,
                    plan_id: plan.id,
                    revision_count: plan.revision_count,
                });
                self.event_bus.publish_alert(OperatorAlert::PlanForceApproved {
                    cycle_id,
                    plan_id: plan.id,
                    revision_count: plan.revision_count,
                });
                Ok(Step::Next(next))
            }
            Transition::Defer => {
                let Some(cycle) = self.load_live(cycle_id).await? else {
                    return self.halted(cycle_id, run).await;
                };
                self.defer(cycle, "deferred by cycle graph".to_string(), run).await
            }
            Transition::Complete => {
                let Some(mut cycle) = self.load_live(cycle_id).await? else {
                    return self.halted(cycle_id, run).await;
                };
                run.write_summary(&mut cycle);
                cycle.complete()?;
                if !self.persist(&cycle).await? {
                    return self.halted(cycle_id, run).await;
                }

                info!(
                    cycle_id = %cycle_id,
                    cycle_number = cycle.cycle_number,
                    revisions = run.revisions,
                    cost_usd = run.cost_usd,
                    "Cycle completed"
                );
                metrics::counter!("reelforge_cycles_completed_total").increment(1);
                self.event_bus.publish_cycle_event(CycleEvent::CycleCompleted {
                    cycle_id,
                    completed_at: cycle.ended_at.unwrap_or_else(Utc::now),
                });
                Ok(Step::Finished(self.report(&cycle, run)))
            }
        }
    }

    async fn defer(&self, mut cycle: Cycle, reason: String, run: &mut RunState) -> Result<Step, EngineError> {
        run.write_summary(&mut cycle);
        cycle.defer(reason.clone())?;
        if !self.persist(&cycle).await? {
            return self.halted(cycle.id, run).await;
        }

        warn!(cycle_id = %cycle.id, %reason, "Cycle deferred");
        metrics::counter!("reelforge_cycles_deferred_total").increment(1);
        self.event_bus.publish_cycle_event(CycleEvent::CycleDeferred {
            cycle_id: cycle.id,
            reason,
            deferred_at: Utc::now(),
        });
        Ok(Step::Finished(self.report(&cycle, run)))
    }

    async fn invoke(&self, cycle: &Cycle, stage: CycleStage, run: &mut RunState) -> Result<StageOutput, EngineError> {
        let executor = self.stages.get(stage).map_err(|source| EngineError::Stage { stage, source })?;
        let ctx = self.build_context(cycle, stage, run).await?;
        let input_summary = format!(
            "cycle #{} {}: {} learnings, {} prior outputs, revision {}",
            cycle.cycle_number,
            stage,
            ctx.learnings.len(),
            ctx.previous.len(),
            ctx.revision.as_ref().map(|r| r.revision_count).unwrap_or(0),
        );

        info!(cycle_id = %cycle.id, stage = %stage, tier = %ctx.model_tier, "Running stage");
        let started = tokio::time::Instant::now();
        let output = executor
            .execute(&ctx)
            .await
            .map_err(|source| EngineError::Stage { stage, source })?;
        let duration = started.elapsed();

        let cost_usd = output.usage.cost_usd(ctx.model_tier);
        let entry = ThoughtLogEntry {
            id: uuid::Uuid::new_v4(),
            cycle_id: cycle.id,
            stage,
            agent_role: stage.agent_role().to_string(),
            model_tier: ctx.model_tier,
            input_summary,
            reasoning: output.reasoning.clone(),
            decision: output.decision.clone(),
            output_summary: output.summary.clone(),
            tools_used: output.tools_used.clone(),
            usage: output.usage,
            cost_usd,
            duration_ms: duration.as_millis() as u64,
            created_at: Utc::now(),
        };
        self.repos.thought_logs.record(&entry).await?;
        self.costs.record_spend(cost_usd, entry.created_at).await?;
        run.cost_usd += cost_usd;

        metrics::counter!("reelforge_stage_completed_total", "stage" => stage.as_str()).increment(1);
        metrics::histogram!("reelforge_stage_duration_seconds", "stage" => stage.as_str())
            .record(duration.as_secs_f64());
        self.event_bus.publish_cycle_event(CycleEvent::StageCompleted {
            cycle_id: cycle.id,
            stage,
            tier: ctx.model_tier,
            cost_usd,
            duration_ms: entry.duration_ms,
            completed_at: entry.created_at,
        });
        Ok(output)
    }

    async fn build_context(&self, cycle: &Cycle, stage: CycleStage, run: &RunState) -> Result<StageContext, EngineError> {
        let model_tier = self.costs.tier_for(stage.as_str()).await?;
        let learnings = self
            .learning
            .active_learnings(Some(stage.agent_role()))
            .await?
            .into_iter()
            .map(|l| LearningBrief {
                id: l.id,
                category: l.category,
                content: l.content,
                confidence: l.confidence.value(),
            })
            .collect();
        let platform_availability = if stage == CycleStage::Post {
            self.cooldown.availability().await?
        } else {
            Vec::new()
        };

        Ok(StageContext {
            cycle_id: cycle.id,
            cycle_number: cycle.cycle_number,
            stage,
            model_tier,
            learnings,
            plan: self.repos.plans.find_latest_for_cycle(cycle.id).await?,
            revision: run.revision.clone(),
            previous: run.previous.clone(),
            platform_availability,
        })
    }

    async fn apply_output(
        &self,
        cycle: &Cycle,
        stage: CycleStage,
        output: &StageOutput,
        run: &mut RunState,
    ) -> Result<StageOutcome, EngineError> {
        for feedback in &output.learning_feedback {
            match self.learning.apply_feedback(feedback.learning_id, feedback.success).await {
                Ok(_) => {}
                Err(LearningError::NotFound(id)) => {
                    warn!(cycle_id = %cycle.id, learning_id = %id, "Feedback for unknown learning ignored")
                }
                Err(LearningError::Inactive(id)) => {
                    debug!(cycle_id = %cycle.id, learning_id = %id, "Feedback for inactive learning ignored")
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.learning.record_learnings(&output.new_learnings).await?;

        match stage {
            CycleStage::PlanContent => {
                self.store_plan(cycle.id, output).await?;
                Ok(StageOutcome::Done)
            }
            CycleStage::ApprovePlan => self.evaluate_approval(cycle, output, run).await,
            CycleStage::Produce => self.evaluate_production(cycle.id, output, run).await,
            CycleStage::Post => {
                self.record_publications(cycle.id, &output.publications).await?;
                Ok(StageOutcome::Done)
            }
            CycleStage::Reflect => {
                let sweep = self.learning.sweep(None).await?;
                info!(
                    cycle_id = %cycle.id,
                    deactivated = sweep.deactivated.len(),
                    promoted = sweep.promoted.len(),
                    failing = sweep.failing.len(),
                    "Learning sweep finished"
                );
                run.sweep = Some(sweep);
                Ok(StageOutcome::Done)
            }
            _ => Ok(StageOutcome::Done),
        }
    }

    async fn store_plan(&self, cycle_id: CycleId, output: &StageOutput) -> Result<(), EngineError> {
        let plan = match self.repos.plans.find_latest_for_cycle(cycle_id).await? {
            Some(mut plan) if !plan.approval_status.is_final() => {
                plan.revise(output.payload.clone());
                plan
            }
            _ => Plan::new(cycle_id, output.payload.clone()),
        };
        self.repos.plans.save(&plan).await?;
        Ok(())
    }

    async fn evaluate_approval(
        &self,
        cycle: &Cycle,
        output: &StageOutput,
        run: &mut RunState,
    ) -> Result<StageOutcome, EngineError> {
        let stage = CycleStage::ApprovePlan;
        let verdict = output
            .verdict
            .as_ref()
            .ok_or_else(|| invalid(stage, "approve_plan returned no verdict"))?;
        let mut plan = self
            .repos
            .plans
            .find_latest_for_cycle(cycle.id)
            .await?
            .ok_or_else(|| invalid(stage, "no plan to approve"))?;
        if let Some(estimate) = output.estimated_production_cost_usd {
            run.production_estimate = Some(estimate);
        }

        if !verdict.approved {
            let category = match verdict.rejection_category.as_deref() {
                Some(raw) if !is_valid_rejection_category(raw) => {
                    warn!(cycle_id = %cycle.id, category = raw, "Unknown rejection category, routing as unspecified");
                    None
                }
                Some(raw) => RejectionCategory::parse(raw),
                None => None,
            };
            run.feedback = verdict.feedback.clone();
            return Ok(StageOutcome::Rejected(category));
        }

        if let Some(scores) = &output.quality {
            let quality = self.score(scores).await?;
            plan.quality_score = Some(quality.overall_score);
            self.repos.plans.save(&plan).await?;
            if !quality.passed {
                run.feedback = Some(format!("draft quality {:.1} below pass threshold", quality.overall_score));
                return Ok(StageOutcome::QualityFailed);
            }
        }

        if self.settings.get_bool(keys::STRATEGY_APPROVAL_REQUIRED).await? {
            let gate = self.approval_gate.as_ref().ok_or(EngineError::ApprovalGateUnavailable)?;
            let decision = gate
                .request_approval(&plan, &output.summary, self.approval_timeout)
                .await?;
            match decision {
                HumanDecision::Approved { decided_by, .. } => {
                    info!(cycle_id = %cycle.id, decided_by = ?decided_by, "Human approval granted");
                    // Keep the sign-off the operator wrote.
                    plan = self
                        .repos
                        .plans
                        .find_by_id(plan.id)
                        .await?
                        .ok_or_else(|| invalid(stage, "approved plan vanished"))?;
                }
                HumanDecision::Rejected { category, reason, .. } => {
                    run.feedback = Some(reason);
                    return Ok(StageOutcome::Rejected(category));
                }
                HumanDecision::TimedOut { .. } => {
                    warn!(cycle_id = %cycle.id, "Human approval timed out, treating as plan revision");
                    run.feedback = Some("human approval timed out".to_string());
                    return Ok(StageOutcome::Rejected(Some(RejectionCategory::PlanRevision)));
                }
            }
        }

        plan.approve();
        self.repos.plans.save(&plan).await?;
        Ok(StageOutcome::Approved)
    }

    async fn evaluate_production(
        &self,
        cycle_id: CycleId,
        output: &StageOutput,
        run: &mut RunState,
    ) -> Result<StageOutcome, EngineError> {
        let Some(scores) = &output.quality else {
            return Ok(StageOutcome::Done);
        };
        let quality = self.score(scores).await?;
        if let Some(mut plan) = self.repos.plans.find_latest_for_cycle(cycle_id).await? {
            plan.quality_score = Some(quality.overall_score);
            self.repos.plans.save(&plan).await?;
        }
        if quality.passed {
            return Ok(StageOutcome::Done);
        }
        run.feedback = Some(format!("produced quality {:.1} below pass threshold", quality.overall_score));
        Ok(StageOutcome::QualityFailed)
    }

    async fn score(&self, scores: &QualityScores) -> Result<QualityVerdict, EngineError> {
        let threshold = self.settings.get_number(keys::QUALITY_PASS_THRESHOLD).await?;
        Ok(score_quality(scores, &QualityWeights::default(), threshold))
    }

    async fn record_publications(&self, cycle_id: CycleId, publications: &[Publication]) -> Result<(), EngineError> {
        for publication in publications {
            if publication.content_id.trim().is_empty()
                || publication.account_id.trim().is_empty()
                || publication.platform_post_id.trim().is_empty()
            {
                return Err(invalid(
                    CycleStage::Post,
                    "publication is missing content, account or platform post id",
                ));
            }
        }

        for publication in publications {
            let mut publication = publication.clone();
            publication.cycle_id = Some(cycle_id);
            let targets = MeasurementTarget::schedule(&publication);
            self.repos.measurements.record_publication(&publication, &targets).await?;
            debug!(
                cycle_id = %cycle_id,
                platform = %publication.platform,
                platform_post_id = %publication.platform_post_id,
                targets = targets.len(),
                "Scheduled measurement targets"
            );
        }
        Ok(())
    }

    async fn loop_state(&self, cycle_id: CycleId) -> Result<(Option<Plan>, LoopState), EngineError> {
        let max_revisions = self.settings.get_count(keys::MAX_STRATEGY_REVISIONS).await?;
        let plan = self.repos.plans.find_latest_for_cycle(cycle_id).await?;
        let revision_count = plan.as_ref().map(|p| p.revision_count).unwrap_or(0);
        Ok((
            plan,
            LoopState {
                revision_count,
                max_revisions,
            },
        ))
    }

    /// Current cycle, or `None` once it has become terminal.
    async fn load_live(&self, id: CycleId) -> Result<Option<Cycle>, EngineError> {
        let cycle = self
            .repos
            .cycles
            .find_by_id(id)
            .await?
            .ok_or(EngineError::CycleNotFound(id))?;
        Ok((!cycle.status.is_terminal()).then_some(cycle))
    }

    /// `false` when the store refused the write because the cycle went terminal.
    async fn persist(&self, cycle: &Cycle) -> Result<bool, EngineError> {
        match self.repos.cycles.save(cycle).await {
            Ok(()) => Ok(true),
            Err(RepositoryError::Conflict(reason)) => {
                debug!(cycle_id = %cycle.id, %reason, "Cycle write refused");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn halted(&self, cycle_id: CycleId, run: &RunState) -> Result<Step, EngineError> {
        let cycle = self
            .repos
            .cycles
            .find_by_id(cycle_id)
            .await?
            .ok_or(EngineError::CycleNotFound(cycle_id))?;
        info!(cycle_id = %cycle_id, status = %cycle.status, "Cycle halted externally, not advancing");
        Ok(Step::Finished(self.report(&cycle, run)))
    }

    async fn fail_cycle(&self, cycle_id: CycleId, reason: &str) {
        let mut cycle = match self.load_live(cycle_id).await {
            Ok(Some(cycle)) => cycle,
            Ok(None) => return,
            Err(e) => {
                error!(cycle_id = %cycle_id, error = %e, "Could not load cycle to mark it failed");
                return;
            }
        };
        if cycle.fail(reason).is_err() {
            return;
        }
        match self.persist(&cycle).await {
            Ok(true) => {
                error!(cycle_id = %cycle_id, reason, "Cycle failed");
                self.announce_failure(&cycle, reason);
            }
            Ok(false) => {}
            Err(e) => error!(cycle_id = %cycle_id, error = %e, "Could not persist failed cycle"),
        }
    }

    fn announce_failure(&self, cycle: &Cycle, reason: &str) {
        metrics::counter!("reelforge_cycles_failed_total").increment(1);
        self.event_bus.publish_cycle_event(CycleEvent::CycleFailed {
            cycle_id: cycle.id,
            reason: reason.to_string(),
            failed_at: cycle.ended_at.unwrap_or_else(Utc::now),
        });
        self.event_bus.publish_alert(OperatorAlert::CycleFailed {
            cycle_id: cycle.id,
            reason: reason.to_string(),
        });
    }

    fn report(&self, cycle: &Cycle, run: &RunState) -> CycleReport {
        CycleReport {
            cycle_id: cycle.id,
            cycle_number: cycle.cycle_number,
            status: cycle.status,
            stages_run: run.stages_run.clone(),
            revisions: run.revisions,
            force_approved: run.force_approved,
            cost_usd: run.cost_usd,
            sweep: run.sweep.clone(),
        }
    }
}
