//! API interaction module
//!
//! Everything between a resource operation and the wire: bearer
//! authentication, the transport-level retry, the per-operation retry loop and
//! the rendering of failures into diagnostics.
//!
//! # Module Structure
//!
//! - [`http`] - Transport seam, base reqwest transport, buffered responses
//! - [`auth`] - Bearer credential injection
//! - [`retry`] - Transport-level retry (429 / 5xx / network faults)
//! - [`operation`] - Per-call-site retry loop
//! - [`diagnostics`] - Failure rendering
//! - [`client`] - Client combining all of the above
//!
//! # Example
//!
//! ```ignore
//! use restgate::api::client::ApiClient;
//! use restgate::api::operation::OperationRetry;
//! use reqwest::{Method, StatusCode};
//!
//! async fn claim(client: &ApiClient, cancel: &CancellationToken) {
//!     // A just-created network may answer 400 for a few seconds
//!     let policy = client.retry_policy(&[StatusCode::BAD_REQUEST]);
//!     let outcome = client
//!         .call_with_retry::<serde_json::Value, _>(
//!             Method::POST, "networks/N_1/devices/claim", Some(&body),
//!             &[StatusCode::OK], &policy, cancel,
//!         )
//!         .await;
//! }
//! ```

pub mod auth;
pub mod client;
pub mod diagnostics;
pub mod error;
pub mod http;
pub mod operation;
pub mod retry;
