//! Operation-level retry
//!
//! A loop-and-wait decorator around one API call, parameterized per call site.
//! It sits above the transport retry and handles failures that only some
//! operations should retry, such as a 400 while a freshly created parent
//! object is still propagating. Waits are constant between attempts.

use super::error::ApiError;
use super::http::ApiResponse;
use super::retry::sleep_or_cancel;
use crate::config::ClientConfiguration;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Result of one API call: payload or error, plus the response when one was observed.
#[derive(Debug)]
pub struct CallResult<T> {
    pub result: Result<T, ApiError>,
    pub response: Option<ApiResponse>,
}

impl<T> CallResult<T> {
    pub fn ok(payload: T, response: ApiResponse) -> Self {
        Self {
            result: Ok(payload),
            response: Some(response),
        }
    }

    /// Failure with an observed response (unexpected status, bad payload)
    pub fn failed(error: ApiError, response: ApiResponse) -> Self {
        Self {
            result: Err(error),
            response: Some(response),
        }
    }

    /// Failure with no response at all (transport fault, cancellation)
    pub fn no_response(error: ApiError) -> Self {
        Self {
            result: Err(error),
            response: None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|r| r.status)
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallResult<U> {
        CallResult {
            result: self.result.map(f),
            response: self.response,
        }
    }
}

/// Per-call-site retry settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRetry {
    /// Total invocations, first one included
    pub max_attempts: u32,
    /// Constant wait between invocations
    pub wait: Duration,
    /// Statuses that trigger another invocation
    pub retry_on: Vec<StatusCode>,
}

impl OperationRetry {
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self {
            max_attempts,
            wait,
            retry_on: Vec::new(),
        }
    }

    /// Single invocation, transport retry only
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Fixed loop for transient upstream faults: 3 attempts, 3 seconds apart, HTTP 500 only
    pub fn server_errors() -> Self {
        Self::new(3, Duration::from_secs(3)).on_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Attempt count and wait from configuration, statuses chosen by the call site
    pub fn from_config(config: &ClientConfiguration, statuses: &[StatusCode]) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            wait: config.retry_wait(),
            retry_on: statuses.to_vec(),
        }
    }

    pub fn on_status(mut self, status: StatusCode) -> Self {
        if !self.retry_on.contains(&status) {
            self.retry_on.push(status);
        }
        self
    }

    /// Whether an outcome deserves another invocation.
    ///
    /// A response decides by its status alone, so its fields are never
    /// consulted when absent. Without a response, a transport error is enough.
    pub fn should_retry<T>(&self, outcome: &CallResult<T>) -> bool {
        match (&outcome.response, &outcome.result) {
            (Some(response), _) => self.retry_on.contains(&response.status),
            (None, Err(ApiError::Transport(_))) => true,
            (None, _) => false,
        }
    }
}

/// Invoke `operation` until it succeeds, fails terminally, or attempts run out.
///
/// The last outcome is returned untouched. Attempts never overlap: each
/// invocation is awaited to completion before the next wait starts. If the
/// token fires during a wait, the call returns `ApiError::Cancelled` along
/// with the last response observed.
pub async fn retry<T, F, Fut>(
    cancel: &CancellationToken,
    policy: &OperationRetry,
    mut operation: F,
) -> CallResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CallResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let span = tracing::debug_span!("operation", op_id = %uuid::Uuid::new_v4());

    async move {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return CallResult::no_response(ApiError::Cancelled);
            }

            let outcome = operation().await;

            if attempt >= max_attempts || !policy.should_retry(&outcome) {
                if attempt > 1 {
                    tracing::debug!(attempt, ok = outcome.is_ok(), "operation settled");
                }
                return outcome;
            }

            match outcome.status() {
                Some(status) => tracing::warn!(
                    attempt,
                    max_attempts,
                    status = status.as_u16(),
                    wait_ms = policy.wait.as_millis() as u64,
                    "retrying operation"
                ),
                None => tracing::warn!(
                    attempt,
                    max_attempts,
                    wait_ms = policy.wait.as_millis() as u64,
                    error = ?outcome.result.as_ref().err(),
                    "retrying operation after transport failure"
                ),
            }

            if !sleep_or_cancel(policy.wait, cancel).await {
                return CallResult {
                    result: Err(ApiError::Cancelled),
                    response: outcome.response,
                };
            }

            attempt += 1;
        }
    }
    .instrument(span)
    .await
}
