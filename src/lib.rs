//! Resilient transport for declarative REST API providers
//!
//! Resource operations hand a single API call to [`api::operation::retry`],
//! which runs it through [`api::client::ApiClient`]: a retrying client over a
//! bearer-authenticated reqwest transport. Failures come back unchanged and are
//! rendered by [`api::diagnostics::collect`].

pub mod api;
pub mod config;
pub mod resource;

pub use api::client::ApiClient;
pub use api::diagnostics::{Diagnostic, Diagnostics};
pub use api::error::{ApiError, HttpError};
pub use api::operation::{retry, CallResult, OperationRetry};
pub use api::retry::RetryPolicy;
pub use config::{ClientConfiguration, Credential};
