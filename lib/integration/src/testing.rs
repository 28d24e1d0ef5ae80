//! Test doubles shared by the unit tests.

use crate::error::{StoreError, TransportError};
use crate::store::SharedStore;
use crate::transport::{Transport, TransportRequest, TransportResponse};
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A store whose every command fails as if the server were down.
pub struct UnreachableStore;

fn unreachable() -> Report<StoreError> {
    StoreError::Unavailable {
        reason: "connection refused".to_string(),
    }
    .into()
}

#[async_trait]
impl SharedStore for UnreachableStore {
    async fn get(&self, _: &str) -> Result<Option<String>, Report<StoreError>> {
        Err(unreachable())
    }
    async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), Report<StoreError>> {
        Err(unreachable())
    }
    async fn delete(&self, _: &str) -> Result<bool, Report<StoreError>> {
        Err(unreachable())
    }
    async fn delete_prefix(&self, _: &str) -> Result<u64, Report<StoreError>> {
        Err(unreachable())
    }
    async fn sorted_set_len(&self, _: &str) -> Result<u64, Report<StoreError>> {
        Err(unreachable())
    }
    async fn sorted_set_admit(
        &self,
        _: &str,
        _: i64,
        _: &str,
        _: i64,
        _: u64,
        _: Duration,
    ) -> Result<Option<u64>, Report<StoreError>> {
        Err(unreachable())
    }
}

/// A store that waits `latency` before every command, like a network hop.
pub struct LatentStore<S> {
    inner: S,
    latency: Duration,
}

impl<S> LatentStore<S> {
    pub fn new(inner: S, latency: Duration) -> Self {
        Self { inner, latency }
    }
}

#[async_trait]
impl<S: SharedStore> SharedStore for LatentStore<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, Report<StoreError>> {
        tokio::time::sleep(self.latency).await;
        self.inner.get(key).await
    }
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), Report<StoreError>> {
        tokio::time::sleep(self.latency).await;
        self.inner.set(key, value, ttl).await
    }
    async fn delete(&self, key: &str) -> Result<bool, Report<StoreError>> {
        tokio::time::sleep(self.latency).await;
        self.inner.delete(key).await
    }
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, Report<StoreError>> {
        tokio::time::sleep(self.latency).await;
        self.inner.delete_prefix(prefix).await
    }
    async fn sorted_set_len(&self, key: &str) -> Result<u64, Report<StoreError>> {
        tokio::time::sleep(self.latency).await;
        self.inner.sorted_set_len(key).await
    }
    async fn sorted_set_admit(
        &self,
        key: &str,
        expired_at: i64,
        member: &str,
        score: i64,
        max: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, Report<StoreError>> {
        tokio::time::sleep(self.latency).await;
        self.inner
            .sorted_set_admit(key, expired_at, member, score, max, ttl)
            .await
    }
}

/// Builds a JSON response.
pub fn json_response(status: u16, body: serde_json::Value) -> TransportResponse {
    TransportResponse {
        status,
        reason: reason_for(status).to_string(),
        headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
        body: body.to_string().into_bytes(),
    }
}

/// Builds a plain-text response.
pub fn text_response(status: u16, body: &str) -> TransportResponse {
    TransportResponse {
        status,
        reason: reason_for(status).to_string(),
        headers: HashMap::from([("content-type".to_string(), "text/plain".to_string())]),
        body: body.as_bytes().to_vec(),
    }
}

fn reason_for(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

type Outcome = Result<TransportResponse, TransportError>;

/// A transport replaying scripted outcomes and recording every request.
///
/// Once the script is exhausted the fallback outcome is returned.
#[derive(Clone)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<Outcome>>>,
    fallback: Outcome,
    delay: Duration,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl MockTransport {
    /// Always answers with `response`.
    pub fn always(response: TransportResponse) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Ok(response),
            delay: Duration::ZERO,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always fails with `error`.
    pub fn failing(error: TransportError) -> Self {
        Self {
            fallback: Err(error),
            ..Self::always(json_response(200, serde_json::json!({})))
        }
    }

    /// Queues outcomes returned before the fallback.
    pub fn then(self, outcome: Outcome) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    /// Sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests seen so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Number of requests sent to `url`.
    pub fn calls_to(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}
