//! Authentication
//!
//! Bearer credential injection as a transport decorator.

use super::http::Transport;
use crate::config::Credential;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response};

/// Transport decorator that sets `Authorization: Bearer <token>` on every request.
///
/// The header replaces any `Authorization` value already present, so a request
/// always leaves with exactly one. Errors and responses from the wrapped
/// transport are returned as-is.
#[derive(Clone)]
pub struct AuthTransport<T> {
    inner: T,
    header: HeaderValue,
}

impl<T> AuthTransport<T> {
    pub fn new(inner: T, credential: &Credential) -> Result<Self> {
        let mut header = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
            .context("Credential contains characters not allowed in an HTTP header")?;
        // Keeps the value out of reqwest/hyper debug output
        header.set_sensitive(true);

        Ok(Self { inner, header })
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for AuthTransport<T> {
    async fn execute(&self, mut request: Request) -> reqwest::Result<Response> {
        request
            .headers_mut()
            .insert(AUTHORIZATION, self.header.clone());
        self.inner.execute(request).await
    }
}
