//! Resource Fetcher
//!
//! Paginated listing. Each page is one orchestrated call; the next page is
//! taken from the RFC 8288 `Link` header (`<url>; rel="next"`).

use super::crud::{finish, Outcome};
use crate::api::client::ApiClient;
use crate::api::diagnostics::Diagnostic;
use crate::api::operation::OperationRetry;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Hard stop for runaway pagination
pub const MAX_PAGES: usize = 1000;

const LIST_EXPECTED: &[StatusCode] = &[StatusCode::OK];

/// One page of results
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Value>,
    /// Absolute URL of the next page
    pub next: Option<String>,
}

/// Fetch all items (auto-paginate)
///
/// `items_path` is a dot path to the array inside each page body; empty when
/// the body is the array itself.
pub async fn list_all<T: DeserializeOwned>(
    client: &ApiClient,
    path: &str,
    items_path: &str,
    policy: &OperationRetry,
    cancel: &CancellationToken,
) -> Outcome<Vec<T>> {
    let mut all_items = Vec::new();
    let mut target = path.to_string();

    for page_number in 1..=MAX_PAGES {
        let page = fetch_page(client, &target, items_path, policy, cancel).await?;
        all_items.extend(page.items);

        match page.next {
            Some(next) if next != target => target = next,
            Some(_) => {
                tracing::warn!("Pagination link points at the current page, stopping");
                break;
            }
            None => break,
        }

        if page_number == MAX_PAGES {
            tracing::warn!("Stopped listing {} after {} pages", path, MAX_PAGES);
        }
    }

    all_items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| vec![Diagnostic::new("Failed to decode list item", e.to_string())].into())
}

/// Fetch one page
pub async fn fetch_page(
    client: &ApiClient,
    target: &str,
    items_path: &str,
    policy: &OperationRetry,
    cancel: &CancellationToken,
) -> Outcome<Page> {
    let outcome = client
        .call_with_retry::<Value, ()>(Method::GET, target, None, LIST_EXPECTED, policy, cancel)
        .await;

    let next = outcome.response.as_ref().and_then(|r| next_link(&r.headers));
    let body = finish(outcome, LIST_EXPECTED)?;

    Ok(Page {
        items: extract_items(&body, items_path),
        next,
    })
}

/// Extract items from a page body using a dot path
fn extract_items(response: &Value, path: &str) -> Vec<Value> {
    if path.is_empty() {
        return response.as_array().cloned().unwrap_or_default();
    }

    let mut current = response;
    for part in path.split('.') {
        current = match current.get(part) {
            Some(v) => v,
            None => return vec![],
        };
    }

    current.as_array().cloned().unwrap_or_default()
}

/// The `rel="next"` target from any `Link` header
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(parse_link_next)
}

fn parse_link_next(entry: &str) -> Option<String> {
    let entry = entry.trim();
    let rest = entry.strip_prefix('<')?;
    let end = rest.find('>')?;
    let target = &rest[..end];

    let is_next = rest[end + 1..].split(';').any(|param| {
        let Some((key, value)) = param.split_once('=') else {
            return false;
        };
        key.trim().eq_ignore_ascii_case("rel")
            && value
                .trim()
                .trim_matches('"')
                .split_ascii_whitespace()
                .any(|rel| rel.eq_ignore_ascii_case("next"))
    });

    is_next.then(|| target.to_string())
}
