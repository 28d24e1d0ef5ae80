//! HTTP transport abstraction.
//!
//! The framework never talks to the network directly. Every request,
//! including OAuth2 token refreshes, goes through a [`Transport`], which
//! allows connectors to swap in their own client and tests to script
//! responses.

use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::debug;

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON.
    Json(JsonValue),
    /// Serialized as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
}

/// A single HTTP request as handed to the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
}

/// A received HTTP response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase for the status (may be empty).
    pub reason: String,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Raw body.
    pub body: Vec<u8>,
}

/// Trait for issuing HTTP-style requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request and returns the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns an error only when no response was received.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;

    /// Releases pooled resources. Called once at framework shutdown.
    async fn close(&self) {}
}

/// Transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing client (e.g. one with a custom TLS or proxy setup).
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn classify(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() || e.is_request() || e.is_body() || dropped_connection(e) {
        TransportError::Connection {
            reason: e.to_string(),
        }
    } else {
        TransportError::Other {
            reason: e.to_string(),
        }
    }
}

/// True if `e` or one of its sources is an I/O error from a connection the
/// peer closed or reset.
fn dropped_connection(e: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(e);
    while let Some(err) = source {
        let kind = err.downcast_ref::<std::io::Error>().map(std::io::Error::kind);
        if matches!(
            kind,
            Some(
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            )
        ) {
            return true;
        }
        source = err.source();
    }
    false
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match request.body {
            Some(RequestBody::Json(body)) => builder.json(&body),
            Some(RequestBody::Form(fields)) => builder.form(&fields),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| classify(&e))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| classify(&e))?.to_vec();

        debug!(status = status.as_u16(), bytes = body.len(), "response received");

        Ok(TransportResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}
