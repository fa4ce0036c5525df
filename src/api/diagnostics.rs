//! Diagnostics
//!
//! Renders a response and/or error into user-facing records. Collection never
//! fails and never decides severity: whether a record aborts the operation is
//! up to the caller.

use super::error::ApiError;
use super::http::{floor_char_boundary, ApiResponse};
use super::operation::CallResult;
use reqwest::StatusCode;
use serde::Serialize;
use std::fmt;

/// Longest body excerpt placed in a diagnostic
pub const MAX_DIAGNOSTIC_BODY: usize = 8 * 1024;

/// One human-readable failure record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub summary: String,
    pub detail: String,
}

impl Diagnostic {
    pub fn new(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.summary)
        } else {
            write!(f, "{}: {}", self.summary, self.detail)
        }
    }
}

/// Append-only list of diagnostics for one operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn append(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.0.extend(diagnostics);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(records: Vec<Diagnostic>) -> Self {
        Self(records)
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}

/// Short hint for common failure statuses
pub fn status_hint(status: StatusCode) -> Option<&'static str> {
    match status.as_u16() {
        400 => Some("Invalid request. Check the resource arguments."),
        401 => Some("Authentication failed. Check the configured API token."),
        403 => Some("Permission denied. The API token lacks access to this resource."),
        404 => Some("Resource not found."),
        409 => Some("Resource conflict. The resource may already exist or be in use."),
        429 => Some("Rate limit exceeded. Retries were exhausted."),
        500..=599 => Some("The API is temporarily unavailable. Try again later."),
        _ => None,
    }
}

/// Render a response and error into diagnostics.
///
/// `expected` lists the statuses the caller treats as success; an empty list
/// means any 2xx.
pub fn collect(
    response: Option<&ApiResponse>,
    error: Option<&ApiError>,
    expected: &[StatusCode],
) -> Vec<Diagnostic> {
    let mut records = Vec::new();

    if let Some(response) = response {
        let status = response.status;
        let unexpected = if expected.is_empty() {
            !status.is_success()
        } else {
            !expected.contains(&status)
        };

        if unexpected {
            let detail = match status_hint(status) {
                Some(hint) => format!("The API returned HTTP {}. {}", status, hint),
                None => format!("The API returned HTTP {}.", status),
            };
            records.push(Diagnostic::new(
                format!("Unexpected HTTP status {}", status.as_u16()),
                detail,
            ));

            if let Some(body) = body_excerpt(response) {
                records.push(Diagnostic::new("Response body", body));
            }
        }
    }

    match error {
        // Already described by the status record
        Some(ApiError::Status { .. }) if response.is_some() => {}
        Some(ApiError::Cancelled) => {
            records.push(Diagnostic::new(
                "Operation cancelled",
                "The operation was cancelled before it completed.",
            ));
        }
        Some(err @ ApiError::Decode(_)) => {
            records.push(Diagnostic::new("Failed to decode API response", err.to_string()));
        }
        Some(err) => {
            records.push(Diagnostic::new("API request failed", error_chain(err)));
        }
        None => {}
    }

    records
}

impl<T> CallResult<T> {
    /// Diagnostics for this outcome, given the statuses the caller expected
    pub fn diagnostics(&self, expected: &[StatusCode]) -> Vec<Diagnostic> {
        collect(self.response.as_ref(), self.result.as_ref().err(), expected)
    }
}

fn body_excerpt(response: &ApiResponse) -> Option<String> {
    let text = response.text();
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if text.len() > MAX_DIAGNOSTIC_BODY {
        let cut = floor_char_boundary(text, MAX_DIAGNOSTIC_BODY);
        return Some(format!("{}... [truncated, {} bytes total]", &text[..cut], text.len()));
    }
    if response.truncated {
        return Some(format!("{}... [truncated]", text));
    }
    Some(text.to_string())
}

/// Error message including its sources
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
