//! CRUD helpers for resource handlers

use crate::api::client::ApiClient;
use crate::api::diagnostics::{collect, Diagnostics};
use crate::api::operation::{CallResult, OperationRetry};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Payload on success, rendered diagnostics otherwise
pub type Outcome<T> = Result<T, Diagnostics>;

const CREATE_EXPECTED: &[StatusCode] = &[StatusCode::OK, StatusCode::CREATED];
const READ_EXPECTED: &[StatusCode] = &[StatusCode::OK];
const UPDATE_EXPECTED: &[StatusCode] = &[StatusCode::OK];
const DELETE_EXPECTED: &[StatusCode] = &[StatusCode::OK, StatusCode::NO_CONTENT];

/// Render the final outcome of a call
pub(crate) fn finish<T>(outcome: CallResult<T>, expected: &[StatusCode]) -> Outcome<T> {
    match outcome.result {
        Ok(payload) => Ok(payload),
        Err(err) => Err(collect(outcome.response.as_ref(), Some(&err), expected).into()),
    }
}

/// Create a resource (POST)
pub async fn create<T, B>(
    client: &ApiClient,
    path: &str,
    body: &B,
    policy: &OperationRetry,
    cancel: &CancellationToken,
) -> Outcome<T>
where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
{
    let outcome = client
        .call_with_retry(Method::POST, path, Some(body), CREATE_EXPECTED, policy, cancel)
        .await;
    finish(outcome, CREATE_EXPECTED)
}

/// Read a resource (GET). `Ok(None)` means the resource no longer exists.
pub async fn read<T>(
    client: &ApiClient,
    path: &str,
    policy: &OperationRetry,
    cancel: &CancellationToken,
) -> Outcome<Option<T>>
where
    T: DeserializeOwned,
{
    let outcome = client
        .call_with_retry::<T, ()>(Method::GET, path, None, READ_EXPECTED, policy, cancel)
        .await;

    if outcome.status() == Some(StatusCode::NOT_FOUND) {
        tracing::info!("{} not found, treating as removed", path);
        return Ok(None);
    }
    finish(outcome, READ_EXPECTED).map(Some)
}

/// Update a resource (PUT)
pub async fn update<T, B>(
    client: &ApiClient,
    path: &str,
    body: &B,
    policy: &OperationRetry,
    cancel: &CancellationToken,
) -> Outcome<T>
where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
{
    let outcome = client
        .call_with_retry(Method::PUT, path, Some(body), UPDATE_EXPECTED, policy, cancel)
        .await;
    finish(outcome, UPDATE_EXPECTED)
}

/// Delete a resource. A resource that is already gone counts as deleted.
pub async fn delete(
    client: &ApiClient,
    path: &str,
    policy: &OperationRetry,
    cancel: &CancellationToken,
) -> Outcome<()> {
    let outcome = client
        .call_with_retry::<serde_json::Value, ()>(
            Method::DELETE,
            path,
            None,
            DELETE_EXPECTED,
            policy,
            cancel,
        )
        .await;

    if outcome.status() == Some(StatusCode::NOT_FOUND) {
        tracing::debug!("{} already deleted", path);
        return Ok(());
    }
    finish(outcome, DELETE_EXPECTED).map(|_| ())
}
