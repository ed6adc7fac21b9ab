//! HTTP seam shared by the metadata cache and the CRUD client.
//!
//! Everything that crosses the network goes through [`Transport`], so the
//! cache and client can be driven by the reqwest-backed [`HttpTransport`] in
//! production and by in-memory fakes in tests. Timeouts belong to the
//! transport, never to its callers.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (30 seconds).
#[cfg(feature = "remote")]
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub const ACCEPT_JSON: &str = "application/json";
pub const ACCEPT_XML: &str = "application/xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub accept: &'static str,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            accept: ACCEPT_JSON,
            body: None,
        }
    }

    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            ..Self::get(url)
        }
    }

    pub fn accept(mut self, accept: &'static str) -> Self {
        self.accept = accept;
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON. An empty body parses as `None`.
    pub fn json(&self) -> Result<Option<Value>, serde_json::Error> {
        if self.body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&self.body).map(Some)
    }
}

/// Sends one request and returns the raw response.
///
/// Implementations report connection-level failures as `TransportError`;
/// any response the server produced, including 4xx/5xx, is returned as
/// `Ok` so callers can inspect its body.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

#[cfg(feature = "remote")]
impl HttpTransport {
    /// Create a transport with the default timeout and no extra headers.
    pub fn new() -> Result<Self, TransportError> {
        Self::builder().build()
    }

    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }
}

#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpTransportBuilder {
    timeout: Duration,
    headers: Vec<(String, String)>,
}

#[cfg(feature = "remote")]
impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self {
            timeout: HTTP_TIMEOUT,
            headers: Vec::new(),
        }
    }
}

#[cfg(feature = "remote")]
impl HttpTransportBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a header sent with every request (e.g. a pre-issued `Authorization`).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<HttpTransport, TransportError> {
        use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::new("", format!("invalid header name {name:?}: {e}"))
            })?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::new("", format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }
        headers.insert("odata-maxversion", HeaderValue::from_static("4.0"));

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::new("", e.to_string()))?;

        Ok(HttpTransport { client })
    }
}

#[cfg(feature = "remote")]
fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("connection error: {e}")
    } else {
        e.to_string()
    }
}

#[cfg(feature = "remote")]
#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .header(reqwest::header::ACCEPT, request.accept);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(&request.url, describe_reqwest_error(&e)))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            TransportError::new(&request.url, describe_reqwest_error(&e)).with_status(status)
        })?;

        tracing::debug!(method = %request.method, url = %request.url, status, "http exchange");
        Ok(HttpResponse { status, body })
    }
}
