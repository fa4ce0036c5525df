//! API Client
//!
//! Main client for resource operations, combining authentication, the
//! transport retry and JSON request/response handling.

use super::auth::AuthTransport;
use super::error::ApiError;
use super::http::{sanitize_for_log, ApiResponse, HttpTransport, MAX_BODY_BYTES};
use super::operation::{self, CallResult, OperationRetry};
use super::retry::RetryingClient;
use crate::config::ClientConfiguration;
use anyhow::{Context, Result};
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Request, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type Stack = RetryingClient<AuthTransport<HttpTransport>>;

/// Main API client. Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct ApiClient {
    http: Arc<Stack>,
    config: Arc<ClientConfiguration>,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: ClientConfiguration) -> Result<Self> {
        let credential = config.resolve_credential()?;
        let base_url = parse_base_url(&config.base_url)?;

        let transport = HttpTransport::new(&config)?;
        let authenticated = AuthTransport::new(transport, &credential)?;
        let http = RetryingClient::new(authenticated, config.transport_policy());

        tracing::debug!(
            base_url = %base_url,
            max_attempts = http.policy().max_attempts,
            "API client ready"
        );

        Ok(Self {
            http: Arc::new(http),
            config: Arc::new(config),
            base_url,
        })
    }

    pub fn config(&self) -> &ClientConfiguration {
        &self.config
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The underlying base transport
    pub fn transport(&self) -> &HttpTransport {
        self.http.transport().inner()
    }

    /// Resolve a path (or absolute URL on the same API) against the base URL.
    ///
    /// Absolute URLs must share the base URL's scheme, host and port, since
    /// every request carries the credential.
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            let url = Url::parse(path).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
            if url.origin() != self.base_url.origin() {
                return Err(ApiError::InvalidRequest(format!(
                    "Refusing to send credentials to {}, outside {}",
                    url.origin().ascii_serialization(),
                    self.base_url.origin().ascii_serialization()
                )));
            }
            return Ok(url);
        }
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))
    }

    /// Orchestrator settings derived from this client's configuration
    pub fn retry_policy(&self, statuses: &[StatusCode]) -> OperationRetry {
        OperationRetry::from_config(&self.config, statuses)
    }

    /// Issue one request and buffer the response.
    ///
    /// Any status is returned as a response; only transport faults and
    /// cancellation produce an error.
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ApiError> {
        let request = self.build_request(method, path, body)?;

        if self.config.debug {
            tracing::trace!("{} {}", request.method(), request.url());
        }

        let response = self.http.execute(request, cancel).await?;
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            read = ApiResponse::read(response, MAX_BODY_BYTES) => read,
        };
        let response = read.map_err(ApiError::Transport)?;

        if self.config.debug {
            tracing::trace!(
                status = response.status.as_u16(),
                "response body: {}",
                sanitize_for_log(&response.text())
            );
        }

        Ok(response)
    }

    /// One API invocation: request, expected-status check, payload decode
    pub async fn call<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        expected: &[StatusCode],
        cancel: &CancellationToken,
    ) -> CallResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = match self.send(method, path, body, cancel).await {
            Ok(response) => response,
            Err(e) => return CallResult::no_response(e),
        };

        let status = response.status;
        let accepted = if expected.is_empty() {
            status.is_success()
        } else {
            expected.contains(&status)
        };
        if !accepted {
            return CallResult::failed(ApiError::Status { status }, response);
        }

        match response.json::<T>() {
            Ok(payload) => CallResult::ok(payload, response),
            Err(e) => CallResult::failed(ApiError::Decode(e), response),
        }
    }

    /// `call` wrapped in the operation retry loop
    pub async fn call_with_retry<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        expected: &[StatusCode],
        policy: &OperationRetry,
        cancel: &CancellationToken,
    ) -> CallResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        operation::retry(cancel, policy, || {
            self.call(method.clone(), path, body, expected, cancel)
        })
        .await
    }

    /// GET a JSON payload
    pub async fn get<T: DeserializeOwned>(&self, path: &str, cancel: &CancellationToken) -> CallResult<T> {
        self.call::<T, ()>(Method::GET, path, None, &[StatusCode::OK], cancel)
            .await
    }

    /// POST a JSON body
    pub async fn post<T, B>(&self, path: &str, body: &B, cancel: &CancellationToken) -> CallResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.call(
            Method::POST,
            path,
            Some(body),
            &[StatusCode::OK, StatusCode::CREATED],
            cancel,
        )
        .await
    }

    /// PUT a JSON body
    pub async fn put<T, B>(&self, path: &str, body: &B, cancel: &CancellationToken) -> CallResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.call(Method::PUT, path, Some(body), &[StatusCode::OK], cancel)
            .await
    }

    /// DELETE, discarding any body
    pub async fn delete(&self, path: &str, cancel: &CancellationToken) -> CallResult<()> {
        self.call::<serde_json::Value, ()>(
            Method::DELETE,
            path,
            None,
            &[StatusCode::OK, StatusCode::NO_CONTENT],
            cancel,
        )
        .await
        .map(|_| ())
    }

    fn build_request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Request, ApiError> {
        let url = self.url(path)?;
        let mut request = Request::new(method, url);
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(body) = body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| ApiError::InvalidRequest(format!("body does not serialize: {}", e)))?;
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            *request.body_mut() = Some(bytes.into());
        }

        Ok(request)
    }
}

/// Base URLs are treated as directories so relative paths append to them
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim()).with_context(|| format!("Invalid base URL {:?}", raw))?;
    if url.cannot_be_a_base() {
        anyhow::bail!("Base URL {:?} cannot carry a path", raw);
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
