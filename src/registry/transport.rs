//! HTTP transport seam for registry requests
//!
//! The coordinator only needs `GET` with custom headers. [`HttpTransport`] is
//! the reqwest-backed implementation; its client (and connection pool) is
//! shared by every fetch and is safe for concurrent use.

use crate::config::TransportConfig;
use crate::error::handlers::NetworkErrorHandler;
use crate::error::{RegistryError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// Streamed response body
pub type BlobStream = BoxStream<'static, Result<Bytes>>;

/// Upper bound on how much of an error body is read for diagnostics
const ERROR_BODY_LIMIT: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BlobStream,
}

impl TransportResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header(CONTENT_LENGTH.as_str()).and_then(|v| v.parse().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// Drain up to a bounded prefix of the body as text, for error reporting
    pub async fn error_text(self) -> String {
        let mut body = self.body;
        let mut collected = Vec::new();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => {
                    let room = ERROR_BODY_LIMIT.saturating_sub(collected.len());
                    collected.extend_from_slice(&chunk[..chunk.len().min(room)]);
                    if collected.len() >= ERROR_BODY_LIMIT {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Registry transport operations
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Issue a GET. Any received HTTP status is `Ok`; `Err` means no response.
    async fn get(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Standard reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone());

        if config.skip_tls {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        let client = builder
            .build()
            .map_err(|e| RegistryError::Validation(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn build_headers(request: &TransportRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RegistryError::Validation(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RegistryError::Validation(format!("Invalid value for header {}: {}", name, e)))?;
            headers.append(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl RegistryTransport for HttpTransport {
    async fn get(&self, request: TransportRequest) -> Result<TransportResponse> {
        let headers = Self::build_headers(&request)?;

        let response = self
            .client
            .get(&request.url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "registry request"))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| NetworkErrorHandler::handle_network_error(&e, "body read")))
            .boxed();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
