// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! HTTP transport seam.
//!
//! All upstream traffic goes through the object-safe [`Transport`] trait so
//! tests can substitute scripted, call-counting stubs. The production
//! implementation is a thin wrapper over one shared `reqwest` client.
//!
//! Non-2xx statuses are returned as values, not errors; mapping a status
//! to a failure cause is the caller's business. A [`TransportError`] means
//! the request never completed (DNS, connect, timeout).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
}

/// Status and body of a completed upstream exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Minimal HTTP surface the automation core needs.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<RawResponse, TransportError>;

    async fn post_form(
        &self,
        url: &str,
        headers: &[(String, String)],
        form: &[(String, String)],
    ) -> Result<RawResponse, TransportError>;

    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<RawResponse, TransportError>;
}

/// Production transport over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    async fn finish(
        request: reqwest::RequestBuilder,
        headers: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        let mut request = request;
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(format!("failed to read body: {e}")))?;

        Ok(RawResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        Self::finish(self.http.get(url), headers).await
    }

    async fn post_form(
        &self,
        url: &str,
        headers: &[(String, String)],
        form: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        let form: Vec<(&str, &str)> = form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        Self::finish(self.http.post(url).form(&form), headers).await
    }

    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<RawResponse, TransportError> {
        Self::finish(self.http.post(url).json(body), headers).await
    }
}

/// Bearer-authorization header pair.
pub fn bearer(access_token: &str) -> Vec<(String, String)> {
    vec![("Authorization".to_string(), format!("Bearer {access_token}"))]
}
