//! Resource call-site contract
//!
//! The helpers every resource handler uses to talk to the API. Each one wraps
//! exactly one logical API call in the operation retry loop and turns the
//! final outcome into either a payload or a set of diagnostics.
//!
//! # Architecture
//!
//! - [`crud`] - Create / read / update / delete with per-call retry settings
//! - [`fetcher`] - Paginated listing following `Link: rel="next"` headers
//!
//! # Example
//!
//! ```ignore
//! use restgate::resource;
//!
//! async fn read_network(client: &ApiClient, id: &str, cancel: &CancellationToken) {
//!     let path = resource::path(&["networks", id]);
//!     match resource::read::<Network>(client, &path, &OperationRetry::server_errors(), cancel).await {
//!         Ok(Some(network)) => { /* refresh state */ }
//!         Ok(None) => { /* gone upstream, drop from state */ }
//!         Err(diagnostics) => { /* surface to the user */ }
//!     }
//! }
//! ```

pub mod crud;
pub mod fetcher;

pub use crud::{create, delete, read, update, Outcome};
pub use fetcher::{fetch_page, list_all, next_link, Page};

/// Join path segments, percent-encoding each one
pub fn path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
