// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # HTTP Stage Executor
//!
//! Anti-corruption layer between the cycle engine and the external reasoning
//! services. Each stage is a JSON POST of the [`StageContext`]; the response
//! body is a [`StageOutput`].
//!
//! Status mapping:
//!
//! | Response | Error |
//! |----------|-------|
//! | 408, 429, 5xx, connection failure | `Transient` (retried) |
//! | other 4xx | `Validation` |
//! | undecodable 2xx body | `Unrecoverable` |
//!
//! Once the retry policy is exhausted a transient failure is reported as
//! `Unrecoverable`, which fails the cycle.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::domain::stage::{StageContext, StageError, StageExecutor, StageOutput};
use crate::infrastructure::retry::{retry_with_backoff, RetryPolicy};

pub struct HttpStageExecutor {
    client: Client,
    endpoint: String,
    policy: RetryPolicy,
}

impl HttpStageExecutor {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shared client for every stage endpoint.
    pub fn build_client(timeout: Duration) -> Result<Client, StageError> {
        Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StageError::Unrecoverable(format!("failed to build HTTP client: {e}")))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call_once(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(ctx)
            .send()
            .await
            .map_err(|e| StageError::Transient(format!("request to {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        response
            .json::<StageOutput>()
            .await
            .map_err(|e| StageError::Unrecoverable(format!("malformed stage response: {e}")))
    }
}

fn classify_status(status: StatusCode, body: String) -> StageError {
    let message = format!("HTTP {}: {}", status.as_u16(), body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT {
        StageError::Transient(message)
    } else {
        StageError::Validation(message)
    }
}

#[async_trait]
impl StageExecutor for HttpStageExecutor {
    #[instrument(skip(self, ctx), fields(stage = %ctx.stage, cycle_id = %ctx.cycle_id))]
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let result = retry_with_backoff(&self.policy, |attempt| {
            debug!(attempt, endpoint = %self.endpoint, "Invoking stage");
            self.call_once(ctx)
        })
        .await;

        result.map_err(|failure| match failure.error {
            StageError::Transient(message) => StageError::Unrecoverable(format!(
                "stage unavailable after {} attempts: {}",
                failure.attempts, message
            )),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cost::ModelTier;
    use crate::domain::cycle::{CycleId, CycleStage};
    use std::collections::HashMap;

    fn context() -> StageContext {
        StageContext {
            cycle_id: CycleId(7),
            cycle_number: 7,
            stage: CycleStage::PlanContent,
            model_tier: ModelTier::HighCost,
            learnings: Vec::new(),
            plan: None,
            revision: None,
            previous: HashMap::new(),
            platform_availability: Vec::new(),
        }
    }

    fn executor(url: String) -> HttpStageExecutor {
        HttpStageExecutor::new(Client::new(), url)
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)).without_jitter())
    }

    #[tokio::test]
    async fn test_successful_call_decodes_output() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/stages/plan_content")
            .match_header("content-type", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"summary":"drafted","payload":{"title":"Hook test"},"usage":{"input_tokens":1200,"output_tokens":300}}"#)
            .create_async()
            .await;

        let output = executor(format!("{}/stages/plan_content", server.url()))
            .execute(&context())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(output.summary, "drafted");
        assert_eq!(output.payload["title"], "Hook test");
        assert_eq!(output.usage.input_tokens, 1200);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/stage")
            .with_status(422)
            .with_body("missing plan")
            .expect(1)
            .create_async()
            .await;

        let err = executor(format!("{}/stage", server.url()))
            .execute(&context())
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, StageError::Validation(msg) if msg.contains("422")));
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_into_unrecoverable() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/stage")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = executor(format!("{}/stage", server.url()))
            .execute(&context())
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, StageError::Unrecoverable(msg) if msg.contains("after 3 attempts")));
    }

    #[tokio::test]
    async fn test_malformed_body_is_unrecoverable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/stage")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = executor(format!("{}/stage", server.url()))
            .execute(&context())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Unrecoverable(_)));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            StageError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, String::new()),
            StageError::Validation(_)
        ));
    }
}
