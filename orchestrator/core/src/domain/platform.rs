// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Platform Metrics Adapter Contract
//!
//! Platform-specific metric fetchers keyed by [`Platform`]. Failures are
//! classified so the measurement job can tell a retryable rate limit from a
//! revoked credential.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::measurement::{MeasurementTarget, Platform, PlatformMetrics};

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Rate limited by platform (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Credentials rejected; fatal for the platform until an operator intervenes.
    #[error("Platform credentials rejected: {0}")]
    Unauthorized(String),

    #[error("Platform rejected request ({status}): {message}")]
    ClientError { status: u16, message: String },

    #[error("Transient platform failure: {0}")]
    Transient(String),
}

impl PlatformError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlatformError::RateLimited { .. } | PlatformError::Transient(_))
    }

    /// Server-requested wait, when the platform sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[async_trait]
pub trait MetricsAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    async fn fetch_metrics(&self, target: &MeasurementTarget) -> Result<PlatformMetrics, PlatformError>;
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn MetricsAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers under the adapter's own platform; replaces any previous one.
    pub fn register(&mut self, adapter: Arc<dyn MetricsAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn MetricsAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(PlatformError::RateLimited { retry_after: None }.is_retryable());
        assert!(PlatformError::Transient("reset".into()).is_retryable());
        assert!(!PlatformError::Unauthorized("expired".into()).is_retryable());
        assert!(!PlatformError::ClientError {
            status: 404,
            message: "gone".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_retry_after_only_from_rate_limit() {
        let limited = PlatformError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(PlatformError::Transient("x".into()).retry_after(), None);
    }
}
