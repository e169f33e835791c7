// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on storage backend
//! configuration, so the domain layer stays free of infrastructure types.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Wire repository and settings implementations for a backend

use std::sync::Arc;

use sqlx::PgPool;

use crate::application::cycle_engine::EngineRepositories;
use crate::domain::repository::{
    CycleRepository, LearningRepository, MeasurementRepository, PlanRepository, RepositoryError, SpendLedger,
    StorageBackend, ThoughtLogRepository,
};
use crate::domain::settings::SettingsProvider;
use crate::infrastructure::repositories::{
    InMemoryCycleRepository, InMemoryLearningRepository, InMemoryMeasurementRepository, InMemoryPlanRepository,
    InMemorySpendLedger, InMemoryThoughtLogRepository, PostgresCycleRepository, PostgresLearningRepository,
    PostgresMeasurementRepository, PostgresPlanRepository, PostgresSpendLedger, PostgresThoughtLogRepository,
};
use crate::infrastructure::settings::{InMemorySettingsProvider, PostgresSettingsProvider};

/// Every persistence port the orchestrator needs, for one backend.
#[derive(Clone)]
pub struct Repositories {
    pub cycles: Arc<dyn CycleRepository>,
    pub plans: Arc<dyn PlanRepository>,
    pub learnings: Arc<dyn LearningRepository>,
    pub measurements: Arc<dyn MeasurementRepository>,
    pub thought_logs: Arc<dyn ThoughtLogRepository>,
    pub ledger: Arc<dyn SpendLedger>,
    pub settings: Arc<dyn SettingsProvider>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            cycles: Arc::new(InMemoryCycleRepository::new()),
            plans: Arc::new(InMemoryPlanRepository::new()),
            learnings: Arc::new(InMemoryLearningRepository::new()),
            measurements: Arc::new(InMemoryMeasurementRepository::new()),
            thought_logs: Arc::new(InMemoryThoughtLogRepository::new()),
            ledger: Arc::new(InMemorySpendLedger::new()),
            settings: Arc::new(InMemorySettingsProvider::with_defaults()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            cycles: Arc::new(PostgresCycleRepository::new(pool.clone())),
            plans: Arc::new(PostgresPlanRepository::new(pool.clone())),
            learnings: Arc::new(PostgresLearningRepository::new(pool.clone())),
            measurements: Arc::new(PostgresMeasurementRepository::new(pool.clone())),
            thought_logs: Arc::new(PostgresThoughtLogRepository::new(pool.clone())),
            ledger: Arc::new(PostgresSpendLedger::new(pool.clone())),
            settings: Arc::new(PostgresSettingsProvider::new(pool)),
        }
    }

    /// The subset the cycle engine persists through.
    pub fn engine(&self) -> EngineRepositories {
        EngineRepositories {
            cycles: self.cycles.clone(),
            plans: self.plans.clone(),
            thought_logs: self.thought_logs.clone(),
            measurements: self.measurements.clone(),
        }
    }
}

/// Creates the repository set for the configured backend. A PostgreSQL
/// backend needs a pool.
pub fn create_repositories(backend: &StorageBackend, pool: Option<PgPool>) -> Result<Repositories, RepositoryError> {
    match (backend, pool) {
        (StorageBackend::InMemory, _) => Ok(Repositories::in_memory()),
        (StorageBackend::PostgreSQL(_), Some(pool)) => Ok(Repositories::postgres(pool)),
        (StorageBackend::PostgreSQL(_), None) => Err(RepositoryError::Database(
            "PostgreSQL backend selected but no connection pool was provided".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::PostgresConfig;
    use crate::domain::settings::keys;

    #[tokio::test]
    async fn test_in_memory_backend_is_seeded() {
        let repos = create_repositories(&StorageBackend::InMemory, None).unwrap();
        let value = repos.settings.get(keys::MAX_STRATEGY_REVISIONS).await.unwrap();
        assert_eq!(value, serde_json::json!(3));
        assert!(repos.engine().cycles.list_recent(5).await.unwrap().is_empty());
    }

    #[test]
    fn test_postgres_backend_requires_pool() {
        let backend = StorageBackend::PostgreSQL(PostgresConfig {
            connection_string: "postgres://localhost/reelforge".to_string(),
        });
        assert!(matches!(
            create_repositories(&backend, None),
            Err(RepositoryError::Database(_))
        ));
    }
}
