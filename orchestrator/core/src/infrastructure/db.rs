// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype that can be
//! injected into all PostgreSQL repository implementations, applies the
//! bundled migrations, and hands out the advisory-lock lease that keeps a
//! deployment down to one cycle engine.

use anyhow::Result;
use sqlx::migrate::Migrator;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use tracing::{debug, info};

use crate::domain::repository::RepositoryError;

/// Advisory lock key held by the running cycle engine.
pub const CYCLE_ENGINE_LOCK_KEY: i64 = 0x7265_656c_6379_636c;

/// Schema migrations bundled with the crate.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::connect(connection_string, 5).await
    }

    pub async fn connect(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Versions already recorded in `_sqlx_migrations`; empty on a fresh database.
    pub async fn applied_migrations(&self) -> Result<Vec<i64>> {
        match sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success ORDER BY version")
            .fetch_all(&self.pool)
            .await
        {
            Ok(applied) => Ok(applied),
            Err(e) if is_undefined_table(&e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Take the session-level advisory lock `key`. `None` when another
    /// process already holds it.
    pub async fn try_acquire_lease(&self, key: i64) -> Result<Option<SingletonLease>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            debug!(key, "Advisory lock held elsewhere");
            return Ok(None);
        }
        Ok(Some(SingletonLease { conn: Some(conn), key }))
    }
}

/// SQLSTATE 42P01, raised before the first migration creates the table.
fn is_undefined_table(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.code().as_deref() == Some("42P01"))
}

/// Holds a dedicated connection for as long as the advisory lock is held.
pub struct SingletonLease {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl SingletonLease {
    pub async fn release(mut self) -> Result<(), RepositoryError> {
        if let Some(mut conn) = self.conn.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.key)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

impl Drop for SingletonLease {
    fn drop(&mut self) {
        // Closing the session is what releases a lock nobody unlocked.
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::error::Error as StdError;

    use sqlx::error::{DatabaseError, ErrorKind};

    #[derive(Debug, thiserror::Error)]
    #[error("{message}")]
    struct PgStateError {
        code: &'static str,
        message: &'static str,
    }

    impl DatabaseError for PgStateError {
        fn message(&self) -> &str {
            self.message
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    fn database_error(code: &'static str, message: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(PgStateError { code, message }))
    }

    #[test]
    fn test_only_a_missing_table_reads_as_no_migrations() {
        assert!(is_undefined_table(&database_error(
            "42P01",
            "relation \"_sqlx_migrations\" does not exist"
        )));
        assert!(!is_undefined_table(&database_error("42501", "permission denied for table _sqlx_migrations")));
        assert!(!is_undefined_table(&sqlx::Error::PoolTimedOut));
        assert!(!is_undefined_table(&sqlx::Error::RowNotFound));
    }
}
