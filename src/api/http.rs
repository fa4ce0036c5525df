//! HTTP utilities: the transport seam and the base reqwest-backed transport

use crate::config::ClientConfiguration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Certificate, Client, Proxy, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::path::Path;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Upper bound on how much of a response body is ever buffered
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = floor_char_boundary(body, MAX_LOG_BODY_LENGTH);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Largest index <= `max` that sits on a char boundary
pub(crate) fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

/// Something that turns one request into one response.
///
/// Implementations perform exactly one exchange per call: no retries,
/// no status inspection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: Request) -> reqwest::Result<Response>;
}

/// Base transport owning the connection pool
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    proxy_applied: bool,
    extra_roots: usize,
}

impl HttpTransport {
    /// Build the transport from configuration.
    ///
    /// An unreadable certificate bundle or a malformed proxy URL degrades the
    /// transport (system trust store, direct connection) instead of failing.
    pub fn new(config: &ClientConfiguration) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout());

        let mut extra_roots = 0;
        if let Some(path) = &config.cert_path {
            match load_certificates(path) {
                Ok(certs) => {
                    extra_roots = certs.len();
                    for cert in certs {
                        builder = builder.add_root_certificate(cert);
                    }
                    tracing::debug!("Loaded {} trust anchors from {:?}", extra_roots, path);
                }
                Err(e) => {
                    tracing::warn!("Using system trust store, custom certificate rejected: {:#}", e);
                }
            }
        }

        let mut proxy_applied = false;
        if let Some(raw) = &config.proxy {
            match parse_proxy(raw) {
                Ok(proxy) => {
                    builder = builder.proxy(proxy);
                    proxy_applied = true;
                    tracing::debug!("Routing requests through configured proxy");
                }
                Err(e) => {
                    tracing::warn!("Ignoring proxy setting, connecting directly: {:#}", e);
                    builder = builder.no_proxy();
                }
            }
        }

        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            proxy_applied,
            extra_roots,
        })
    }

    /// Whether a configured proxy is in use
    pub fn proxy_applied(&self) -> bool {
        self.proxy_applied
    }

    /// Number of trust anchors added on top of the system store
    pub fn extra_roots(&self) -> usize {
        self.extra_roots
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        self.client.execute(request).await
    }
}

/// Read a PEM bundle into certificates
fn load_certificates(path: &Path) -> Result<Vec<Certificate>> {
    let pem = std::fs::read(path)
        .with_context(|| format!("Failed to read certificate file {}", path.display()))?;
    let certs = Certificate::from_pem_bundle(&pem)
        .with_context(|| format!("Failed to parse certificate file {}", path.display()))?;
    if certs.is_empty() {
        anyhow::bail!("No certificates found in {}", path.display());
    }
    Ok(certs)
}

/// Validate a proxy URL before handing it to reqwest
fn parse_proxy(raw: &str) -> Result<Proxy> {
    let url = url::Url::parse(raw.trim()).context("Proxy URL does not parse")?;
    if !matches!(url.scheme(), "http" | "https" | "socks5" | "socks5h") {
        anyhow::bail!("Unsupported proxy scheme {:?}", url.scheme());
    }
    if url.host_str().map_or(true, str::is_empty) {
        anyhow::bail!("Proxy URL has no host");
    }
    Proxy::all(url.as_str()).context("Proxy URL rejected")
}

/// A fully observed response with a bounded, buffered body.
///
/// Reading the body consumes the `reqwest::Response`, so this is the form
/// passed up to the orchestrator and the diagnostics collector.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// The body was longer than the read limit and has been cut
    pub truncated: bool,
}

impl ApiResponse {
    /// Buffer at most `limit` bytes of the body
    pub async fn read(mut response: Response, limit: usize) -> reqwest::Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let mut body = Vec::new();
        let mut truncated = false;

        while let Some(chunk) = response.chunk().await? {
            let room = limit.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(Self {
            status,
            headers,
            body,
            truncated,
        })
    }

    /// Build a response by hand (tests and synthetic call sites)
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            truncated: false,
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Decode the body, treating an empty body as JSON `null`
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_slice(b"null");
        }
        serde_json::from_slice(&self.body)
    }
}
