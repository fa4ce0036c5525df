//! Configuration Management
//!
//! Client configuration is resolved once at provider initialization:
//! config file, then environment, then explicit overrides from the caller.
//! After that it is immutable and shared by reference with every layer.

use crate::api::retry::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.example.com/api/v1";

/// Environment variable holding the bearer credential fallback
pub const TOKEN_ENV: &str = "RESTGATE_API_TOKEN";
pub const BASE_URL_ENV: &str = "RESTGATE_BASE_URL";
pub const CA_CERT_ENV: &str = "RESTGATE_CA_CERT";
pub const PROXY_ENV: &str = "RESTGATE_PROXY";
pub const TIMEOUT_ENV: &str = "RESTGATE_TIMEOUT";
pub const MAX_RETRIES_ENV: &str = "RESTGATE_MAX_RETRIES";
pub const RETRY_WAIT_ENV: &str = "RESTGATE_RETRY_WAIT";
pub const DEBUG_ENV: &str = "RESTGATE_DEBUG";

/// Bearer token used to authenticate every request.
///
/// Never serialized and never printed: `Debug` is redacted.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value, for building the `Authorization` header only
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(****)")
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfiguration {
    /// API endpoint all request paths are joined onto
    pub base_url: String,
    /// User-Agent sent with every request
    pub user_agent: String,
    /// Verbose request/response tracing
    pub debug: bool,
    /// PEM bundle with additional trust anchors
    pub cert_path: Option<PathBuf>,
    /// Upstream proxy for all requests
    pub proxy: Option<String>,
    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
    /// Transport-level attempt ceiling (first attempt included)
    pub max_retries: u32,
    /// Initial exponential backoff in milliseconds
    pub base_wait_ms: u64,
    /// Ceiling for any single transport wait, including `Retry-After`, in seconds
    pub retry_wait_secs: u64,
    /// Explicit credential; falls back to `RESTGATE_API_TOKEN`
    #[serde(skip_serializing)]
    pub credential: Option<Credential>,
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: format!("restgate/{}", env!("CARGO_PKG_VERSION")),
            debug: false,
            cert_path: None,
            proxy: None,
            timeout_secs: 30,
            max_retries: 3,
            base_wait_ms: 1_000,
            retry_wait_secs: 60,
            credential: None,
        }
    }
}

impl ClientConfiguration {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("restgate").join("config.json"))
    }

    /// Load configuration from disk, then apply environment overrides
    pub fn load() -> Self {
        let from_file = match Self::config_path() {
            Some(path) if path.exists() => match Self::from_file(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Ignoring config file {:?}: {:#}", path, e);
                    Self::default()
                }
            },
            _ => Self::default(),
        };

        from_file.with_env()
    }

    /// Parse a JSON configuration file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse configuration JSON")
    }

    /// Apply overrides from the process environment
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// The credential variable is consulted lazily by [`Self::resolve_credential`]
    /// so that an explicit credential always wins.
    pub fn with_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(BASE_URL_ENV) {
            self.base_url = url;
        }
        if let Some(path) = lookup(CA_CERT_ENV) {
            self.cert_path = Some(PathBuf::from(path));
        }
        if let Some(proxy) = lookup(PROXY_ENV) {
            self.proxy = Some(proxy);
        }
        if let Some(secs) = parse_env(TIMEOUT_ENV, lookup(TIMEOUT_ENV)) {
            self.timeout_secs = secs;
        }
        if let Some(retries) = parse_env(MAX_RETRIES_ENV, lookup(MAX_RETRIES_ENV)) {
            self.max_retries = retries;
        }
        if let Some(secs) = parse_env(RETRY_WAIT_ENV, lookup(RETRY_WAIT_ENV)) {
            self.retry_wait_secs = secs;
        }
        if let Some(flag) = lookup(DEBUG_ENV) {
            self.debug = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if self.credential.as_ref().map_or(true, Credential::is_empty) {
            self.credential = lookup(TOKEN_ENV).map(Credential::new);
        }

        self
    }

    /// Credential to authenticate with (explicit value, else environment)
    pub fn resolve_credential(&self) -> Result<Credential> {
        self.resolve_credential_from(|key| std::env::var(key).ok())
    }

    /// Like [`resolve_credential`](Self::resolve_credential) with a custom
    /// variable lookup. Empty values count as unset.
    pub fn resolve_credential_from<F>(&self, lookup: F) -> Result<Credential>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credential = self
            .credential
            .clone()
            .filter(|c| !c.is_empty())
            .or_else(|| lookup(TOKEN_ENV).map(Credential::new))
            .filter(|c| !c.is_empty());

        credential.with_context(|| {
            format!("No API credential configured. Set {} or provide one explicitly", TOKEN_ENV)
        })
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Longest single wait the transport will honor
    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait_secs)
    }

    /// Retry policy for the transport-level safety net
    pub fn transport_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_wait: Duration::from_millis(self.base_wait_ms),
            max_wait: self.retry_wait(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
    let value = value?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={:?}", key, value);
            None
        }
    }
}
