//! The request pipeline.
//!
//! `make_request` runs every call through the same steps: lookup, enabled
//! check, rate limit, cache, authentication, bounded retries and response
//! normalization. Failures are reported in the returned [`ApiResponse`],
//! never as an `Err`.

use crate::auth::AuthManager;
use crate::cache::CacheManager;
use crate::error::TransportError;
use crate::registry::{IntegrationEntry, IntegrationRegistry};
use crate::response::ApiResponse;
use crate::transport::{RequestBody, Transport, TransportRequest, TransportResponse};
use reqwest::Method;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Statuses that are retried with backoff.
pub const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Upper bound for a single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("switchyard/", env!("CARGO_PKG_VERSION"));

/// A call to make against an integration.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the integration's base URL.
    pub endpoint: String,
    /// Query parameters.
    pub params: BTreeMap<String, String>,
    /// JSON body.
    pub body: Option<JsonValue>,
    /// Extra headers; these win over defaults and auth headers.
    pub headers: HashMap<String, String>,
    /// Whether a GET may be answered from, and stored in, the cache.
    pub use_cache: bool,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            body: None,
            headers: HashMap::new(),
            use_cache: true,
        }
    }

    #[must_use]
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    #[must_use]
    pub fn post(endpoint: impl Into<String>, body: JsonValue) -> Self {
        Self::new(Method::POST, endpoint).with_body(body)
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Bypasses the cache for this call.
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    fn is_cacheable(&self) -> bool {
        self.use_cache && self.method == Method::GET
    }
}

/// Runs API calls for registered integrations.
#[derive(Clone)]
pub struct RequestDispatcher {
    registry: Arc<IntegrationRegistry>,
    auth: Arc<AuthManager>,
    cache: CacheManager,
    transport: Arc<dyn Transport>,
    user_agent: String,
    charge_cache_hits: bool,
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("user_agent", &self.user_agent)
            .field("charge_cache_hits", &self.charge_cache_hits)
            .finish_non_exhaustive()
    }
}

impl RequestDispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<IntegrationRegistry>,
        auth: Arc<AuthManager>,
        cache: CacheManager,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            auth,
            cache,
            transport,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            charge_cache_hits: true,
        }
    }

    /// Sets the `User-Agent` sent with every call.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Whether cache hits count against the rate limit (the default).
    #[must_use]
    pub fn with_charge_cache_hits(mut self, charge: bool) -> Self {
        self.charge_cache_hits = charge;
        self
    }

    /// Makes an API call to `integration`.
    #[instrument(skip(self, request), fields(integration = %integration, method = %request.method, endpoint = %request.endpoint))]
    pub async fn make_request(&self, integration: &str, request: ApiRequest) -> ApiResponse {
        let Some(entry) = self.registry.get(integration).await else {
            return ApiResponse::failure(0, format!("Integration '{integration}' not found"));
        };
        if !entry.is_enabled() {
            return ApiResponse::failure(0, format!("Integration '{integration}' is disabled"));
        }

        let cache_key = request.is_cacheable().then(|| {
            CacheManager::generate_key(integration, &request.endpoint, &request.params)
        });

        if !self.charge_cache_hits {
            if let Some(hit) = self.cached(cache_key.as_deref()).await {
                return hit;
            }
        }
        if !entry.limiter().is_allowed(integration).await {
            debug!("rate limit exceeded");
            return ApiResponse::rate_limited();
        }
        if self.charge_cache_hits {
            if let Some(hit) = self.cached(cache_key.as_deref()).await {
                return hit;
            }
        }

        let response = self.send_with_retries(&entry, &request).await;

        if let (Some(key), Some(ttl), true) = (
            cache_key.as_deref(),
            entry.config().cache_ttl(),
            response.success,
        ) {
            if let Some(data) = &response.data {
                self.cache.set(key, data, ttl).await;
            }
        }
        response
    }

    async fn cached(&self, key: Option<&str>) -> Option<ApiResponse> {
        let data = self.cache.get(key?).await?;
        debug!("cache hit");
        Some(ApiResponse::from_cache(data))
    }

    async fn send_with_retries(&self, entry: &IntegrationEntry, request: &ApiRequest) -> ApiResponse {
        let config = entry.config();
        let auth_headers = self
            .auth
            .get_auth_headers(entry.name().as_str(), entry.auth())
            .await;
        let defaults = HashMap::from([
            ("Content-Type".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), self.user_agent.clone()),
        ]);

        let outgoing = TransportRequest {
            method: request.method.clone(),
            url: config.url_for(&request.endpoint),
            headers: merge_headers([defaults, auth_headers, request.headers.clone()]),
            query: request
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: request.body.clone().map(RequestBody::Json),
            timeout: config.timeout(),
        };

        let started = Instant::now();
        let mut retries = 0;
        let outcome = loop {
            let outcome = match tokio::time::timeout(
                config.timeout(),
                self.transport.send(outgoing.clone()),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout),
            };

            let retryable = match &outcome {
                Ok(response) => RETRY_STATUSES.contains(&response.status),
                Err(e) => e.is_transient(),
            };
            if !retryable || retries >= config.max_retries {
                break outcome;
            }

            retries += 1;
            let delay = backoff_delay(config.retry_backoff_factor, retries);
            debug!(retry = retries, delay = ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(response) => normalize(response, elapsed),
            Err(e) => ApiResponse {
                response_time: elapsed,
                ..ApiResponse::failure(0, e.to_string())
            },
        }
    }
}

/// Delay before retry number `retry` (1-based).
#[must_use]
pub fn backoff_delay(factor: f64, retry: u32) -> Duration {
    let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
    let secs = factor * 2f64.powi(exponent);
    Duration::try_from_secs_f64(secs).map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
}

/// Merges header maps; later maps win and names compare case-insensitively.
fn merge_headers<const N: usize>(layers: [HashMap<String, String>; N]) -> HashMap<String, String> {
    let mut merged: HashMap<String, String> = HashMap::new();
    for layer in layers {
        for (name, value) in layer {
            merged.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
            merged.insert(name, value);
        }
    }
    merged
}

fn normalize(response: TransportResponse, elapsed: Duration) -> ApiResponse {
    let success = response.status < 400;
    let data = if response.body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice(&response.body).unwrap_or_else(|_| {
                JsonValue::String(String::from_utf8_lossy(&response.body).into_owned())
            }),
        )
    };
    ApiResponse {
        success,
        status_code: response.status,
        data,
        error: (!success).then(|| format!("HTTP {}: {}", response.status, response.reason)),
        headers: response.headers,
        response_time: elapsed,
        cached: false,
    }
}
