//! Transport-level retry
//!
//! The general safety net under every API call: 429, 5xx and transient
//! network faults are retried with exponential backoff (or the server's
//! `Retry-After`), up to a fixed attempt ceiling. Call sites never see this
//! layer's retries, only the last response or error.

use super::error::HttpError;
use super::http::Transport;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Request, Response, StatusCode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bounded retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included
    pub max_attempts: u32,
    /// Wait after the first failed attempt
    pub base_wait: Duration,
    /// Ceiling for any single wait
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn single() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Exponential backoff after the given (1-based) failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_wait.saturating_mul(factor).min(self.max_wait)
    }

    /// Wait before retrying a retryable response
    pub fn wait_for(&self, status: StatusCode, headers: &HeaderMap, attempt: u32) -> Duration {
        if status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(wait) = retry_after(headers, Utc::now()) {
                return wait.min(self.max_wait);
            }
        }
        self.backoff(attempt)
    }
}

/// Statuses the transport always retries
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Network faults worth another attempt.
///
/// Connect, DNS and TLS failures, timeouts, and connections dropped or reset
/// before a response arrived. Builder, redirect and decode errors are final.
pub fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

/// Parse `Retry-After` as delta-seconds or HTTP-date.
///
/// A date in the past yields a zero wait.
pub fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Sleep unless cancelled first. Returns `false` when cancelled.
pub(crate) async fn sleep_or_cancel(wait: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}

/// HTTP client wrapping a transport with the transport-level retry policy
#[derive(Clone)]
pub struct RetryingClient<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Execute a request, retrying transient failures.
    ///
    /// Returns the last response (whatever its status) or the last transport
    /// error once the policy is exhausted. Cancellation is checked before every
    /// attempt and raced against every wait and every in-flight exchange.
    pub async fn execute(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let method = request.method().clone();
        let url = request.url().clone();
        let mut request = request;
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(HttpError::Cancelled);
            }

            // Only clone when another attempt is still possible
            let replay = if attempt < max_attempts {
                let copy = request.try_clone();
                if copy.is_none() {
                    tracing::debug!("{} {} has a streaming body, single attempt only", method, url);
                }
                copy
            } else {
                None
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HttpError::Cancelled),
                outcome = self.transport.execute(request) => outcome,
            };

            let Some(next) = replay else {
                return outcome.map_err(HttpError::from);
            };

            let wait = match &outcome {
                Ok(response) if is_retryable_status(response.status()) => {
                    let wait = self
                        .policy
                        .wait_for(response.status(), response.headers(), attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        status = response.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "{} {} returned retryable status",
                        method,
                        url
                    );
                    Some(wait)
                }
                Err(e) if is_transient(e) => {
                    let wait = self.policy.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "{} {} failed: {}",
                        method,
                        url,
                        e
                    );
                    Some(wait)
                }
                _ => None,
            };
            let Some(wait) = wait else {
                return outcome.map_err(HttpError::from);
            };

            // Release the connection before waiting
            drop(outcome);

            if !sleep_or_cancel(wait, cancel).await {
                tracing::debug!("{} {} cancelled during backoff", method, url);
                return Err(HttpError::Cancelled);
            }

            request = next;
            attempt += 1;
        }
    }
}
