// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # HTTP Metrics Adapter
//!
//! Generic [`MetricsAdapter`] for a platform metrics gateway that serves
//! `GET {base_url}/posts/{platform_post_id}/metrics?window=48h` and answers
//! with a JSON object shaped like [`PlatformMetrics`]. One instance per
//! platform; credentials are a bearer token read from the environment at
//! startup.
//!
//! Retries are not done here. The measurement job owns backoff so that the
//! per-platform rate limit is respected across targets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use crate::domain::measurement::{MeasurementTarget, Platform, PlatformMetrics};
use crate::domain::platform::{MetricsAdapter, PlatformError};

pub struct HttpMetricsAdapter {
    client: Client,
    platform: Platform,
    base_url: String,
    token: Option<String>,
}

impl HttpMetricsAdapter {
    pub fn new(client: Client, platform: Platform, base_url: impl Into<String>) -> Self {
        Self {
            client,
            platform,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn metrics_url(&self, target: &MeasurementTarget) -> String {
        format!("{}/posts/{}/metrics", self.base_url, target.platform_post_id)
    }
}

/// Parse `Retry-After` given in delta-seconds. HTTP-date values are ignored.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> PlatformError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformError::Unauthorized(body),
        StatusCode::TOO_MANY_REQUESTS => PlatformError::RateLimited { retry_after },
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            PlatformError::Transient(format!("HTTP {}: {}", s.as_u16(), body))
        }
        s => PlatformError::ClientError {
            status: s.as_u16(),
            message: body,
        },
    }
}

#[async_trait]
impl MetricsAdapter for HttpMetricsAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn fetch_metrics(&self, target: &MeasurementTarget) -> Result<PlatformMetrics, PlatformError> {
        let mut request = self
            .client
            .get(self.metrics_url(target))
            .query(&[("window", target.window.as_str())]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let wait = retry_after(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, wait, body));
        }

        let metrics = response
            .json::<PlatformMetrics>()
            .await
            .map_err(|e| PlatformError::Transient(format!("undecodable metrics payload: {e}")))?;
        debug!(
            platform = %self.platform,
            post_id = %target.platform_post_id,
            views = metrics.views,
            "Fetched platform metrics"
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::measurement::{MeasurementWindow, Publication};
    use chrono::Utc;
    use uuid::Uuid;

    fn target() -> MeasurementTarget {
        let publication = Publication {
            id: Uuid::new_v4(),
            cycle_id: None,
            content_id: "CNT-12".into(),
            account_id: "ACC-3".into(),
            platform: Platform::Youtube,
            platform_post_id: "yt-abc".into(),
            posted_at: Utc::now(),
        };
        MeasurementTarget::for_publication(&publication, MeasurementWindow::Days7)
    }

    fn adapter(server: &mockito::Server) -> HttpMetricsAdapter {
        HttpMetricsAdapter::new(Client::new(), Platform::Youtube, format!("{}/", server.url())).with_token("secret")
    }

    #[tokio::test]
    async fn test_fetch_decodes_metrics() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/posts/yt-abc/metrics")
            .match_query(mockito::Matcher::UrlEncoded("window".into(), "7d".into()))
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"views":1000,"likes":50,"comments":30,"shares":20,"follower_delta":4}"#)
            .create_async()
            .await;

        let metrics = adapter(&server).fetch_metrics(&target()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(metrics.views, 1000);
        assert_eq!(metrics.follower_delta, 4);
        assert_eq!(metrics.saves, None);
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/posts/yt-abc/metrics")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "30")
            .create_async()
            .await;

        let err = adapter(&server).fetch_metrics(&target()).await.unwrap_err();
        assert_eq!(
            err,
            PlatformError::RateLimited {
                retry_after: Some(Duration::from_secs(30))
            }
        );
    }

    #[tokio::test]
    async fn test_unauthorized_and_client_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/posts/yt-abc/metrics")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .with_body("token expired")
            .create_async()
            .await;

        let err = adapter(&server).fetch_metrics(&target()).await.unwrap_err();
        assert_eq!(err, PlatformError::Unauthorized("token expired".into()));

        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, None, "deleted".into()),
            PlatformError::ClientError {
                status: 404,
                message: "deleted".into()
            }
        );
        assert!(classify_status(StatusCode::BAD_GATEWAY, None, String::new()).is_retryable());
    }
}
