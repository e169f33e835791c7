// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Settings providers backed by the `system_settings` table or process memory.
//!
//! Neither provider caches: every `get` is a fresh read.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;

use crate::domain::repository::RepositoryError;
use crate::domain::settings::{default_settings, SettingsError, SettingsProvider};

fn builtin_default(key: &str) -> Option<Value> {
    default_settings()
        .into_iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

pub struct PostgresSettingsProvider {
    pool: PgPool,
}

impl PostgresSettingsProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every stored setting, sorted by key.
    pub async fn list(&self) -> Result<BTreeMap<String, Value>, SettingsError> {
        let rows = sqlx::query("SELECT key, value FROM system_settings ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let mut out = BTreeMap::new();
        for row in rows {
            let key: String = row.get("key");
            let value: Value = row.get("value");
            out.insert(key, value);
        }
        Ok(out)
    }
}

#[async_trait]
impl SettingsProvider for PostgresSettingsProvider {
    async fn get(&self, key: &str) -> Result<Value, SettingsError> {
        let row = sqlx::query("SELECT value FROM system_settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        match row {
            Some(row) => Ok(row.get("value")),
            None => {
                // Rows the operator deleted fall back to the shipped default.
                let fallback = builtin_default(key).ok_or_else(|| SettingsError::NotFound(key.to_string()))?;
                debug!(key, "Setting missing from store, using built-in default");
                Ok(fallback)
            }
        }
    }
}

/// Mutable in-process settings for development and tests.
#[derive(Default)]
pub struct InMemorySettingsProvider {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemorySettingsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded with the same values the migration inserts.
    pub fn with_defaults() -> Self {
        let values = default_settings()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            values: RwLock::new(values),
        }
    }

    /// Visible to the very next read.
    pub fn set(&self, key: &str, value: Value) {
        self.values.write().insert(key.to_string(), value);
    }

    pub fn list(&self) -> BTreeMap<String, Value> {
        self.values
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl SettingsProvider for InMemorySettingsProvider {
    async fn get(&self, key: &str) -> Result<Value, SettingsError> {
        self.values
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| SettingsError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::keys;
    use serde_json::json;

    #[tokio::test]
    async fn test_defaults_are_seeded() {
        let settings = InMemorySettingsProvider::with_defaults();
        assert_eq!(settings.get_count(keys::MAX_STRATEGY_REVISIONS).await.unwrap(), 3);
        assert_eq!(settings.get_number(keys::QUALITY_PASS_THRESHOLD).await.unwrap(), 8.0);
        assert!(!settings.get_bool(keys::STRATEGY_APPROVAL_REQUIRED).await.unwrap());
        assert_eq!(settings.list().len(), default_settings().len());
    }

    #[tokio::test]
    async fn test_writes_are_visible_immediately() {
        let settings = InMemorySettingsProvider::with_defaults();
        settings.set(keys::QUALITY_PASS_THRESHOLD, json!("6.5"));
        assert_eq!(settings.get_number(keys::QUALITY_PASS_THRESHOLD).await.unwrap(), 6.5);
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let settings = InMemorySettingsProvider::new();
        assert!(matches!(settings.get("NOPE").await, Err(SettingsError::NotFound(_))));
    }

    #[test]
    fn test_builtin_default_lookup() {
        assert_eq!(builtin_default(keys::PLATFORM_COOLDOWN_HOURS), Some(json!(4)));
        assert_eq!(builtin_default("NOPE"), None);
    }
}
