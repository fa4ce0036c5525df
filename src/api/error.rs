//! Error types for the transport and orchestration layers.
//!
//! Both enums wrap the underlying `reqwest::Error` transparently, and a
//! status failure keeps the original status code.

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single transport-level exchange (after transport retries).
#[derive(Debug, Error)]
pub enum HttpError {
    /// DNS, connection, TLS, timeout or body errors from the HTTP stack.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// The caller's cancellation token fired before the exchange finished.
    #[error("request cancelled")]
    Cancelled,
}

/// Failure of one API call as seen by a resource operation.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable response: the request never completed.
    #[error(transparent)]
    Transport(reqwest::Error),

    /// The API answered with a status the call site did not expect.
    #[error("unexpected HTTP status {status}")]
    Status { status: StatusCode },

    /// The API answered as expected but the payload did not decode.
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The request could not be built (bad path or body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<HttpError> for ApiError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Transport(e) => Self::Transport(e),
            HttpError::Cancelled => Self::Cancelled,
        }
    }
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Status code carried by the error, when the API answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status } => Some(*status),
            Self::Transport(e) => e.status(),
            _ => None,
        }
    }
}
