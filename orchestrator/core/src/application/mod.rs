// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod cost_allocator;
pub mod cycle_engine;
pub mod cycle_scheduler;
pub mod learning_engine;
pub mod measurement_job;
pub mod posting_cooldown;
pub mod repository_factory;

// Re-export services for convenience
pub use cost_allocator::{BudgetDecision, CostAllocator, CostError};
pub use cycle_engine::{CycleEngine, CycleReport, EngineError, EngineRepositories};
pub use cycle_scheduler::{CycleScheduler, TickReport};
pub use learning_engine::{LearningEngine, LearningError};
pub use measurement_job::{MeasurementError, MeasurementJob, PassReport};
pub use posting_cooldown::{CooldownError, CooldownStatus, PostingCooldown};
pub use repository_factory::{create_repositories, Repositories};
