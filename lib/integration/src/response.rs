//! Result types handed back to connectors.
//!
//! Per-call outcomes are values, not errors: callers check `success`
//! before trusting `data`, and surface `error` strings verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::{AuthKind, SyncStrategy};

/// Status code reported when the framework rejects a call for exceeding
/// the rate limit.
pub const RATE_LIMITED_STATUS: u16 = 429;

/// Uniform result of a single API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Whether the call succeeded (`status_code < 400`).
    pub success: bool,
    /// HTTP status, or 0 when no response was received.
    pub status_code: u16,
    /// Parsed JSON body; raw text bodies are carried as a JSON string.
    pub data: Option<JsonValue>,
    /// Error description when unsuccessful.
    pub error: Option<String>,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Time spent on the call, retries included.
    pub response_time: Duration,
    /// Whether `data` came from the response cache.
    pub cached: bool,
}

impl ApiResponse {
    /// Creates a failed response that never reached the network.
    #[must_use]
    pub fn failure(status_code: u16, error: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code,
            data: None,
            error: Some(error.into()),
            headers: HashMap::new(),
            response_time: Duration::ZERO,
            cached: false,
        }
    }

    /// Creates a response served from the cache.
    #[must_use]
    pub fn from_cache(data: JsonValue) -> Self {
        Self {
            success: true,
            status_code: 200,
            data: Some(data),
            error: None,
            headers: HashMap::new(),
            response_time: Duration::ZERO,
            cached: true,
        }
    }

    /// Creates the rate-limit rejection.
    #[must_use]
    pub fn rate_limited() -> Self {
        Self::failure(RATE_LIMITED_STATUS, "Rate limit exceeded")
    }

    /// Returns true if this is a rate-limit rejection.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        !self.success && self.status_code == RATE_LIMITED_STATUS
    }
}

/// Result of a synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Whether the pass succeeded overall.
    pub success: bool,
    /// Records examined.
    pub records_processed: u64,
    /// Records created locally.
    pub records_created: u64,
    /// Records updated locally.
    pub records_updated: u64,
    /// Records that could not be applied.
    pub records_failed: u64,
    /// Error descriptions, including partial failures.
    pub errors: Vec<String>,
    /// Time spent in the sync procedure.
    pub sync_time: Duration,
    /// Completion time recorded as the new last-sync marker.
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

impl SyncResult {
    /// Creates a successful result with no counts.
    #[must_use]
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Creates a failed result carrying one error.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![error.into()],
            ..Self::default()
        }
    }

    /// Sets the record counts.
    #[must_use]
    pub fn with_counts(mut self, processed: u64, created: u64, updated: u64, failed: u64) -> Self {
        self.records_processed = processed;
        self.records_created = created;
        self.records_updated = updated;
        self.records_failed = failed;
        self
    }

    /// Adds an error without changing `success`.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }
}

/// Snapshot of an integration for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationStatus {
    pub name: String,
    pub enabled: bool,
    pub base_url: String,
    pub auth_kind: AuthKind,
    /// Whether a live probe of the base URL succeeded.
    pub connectivity: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub rate_limit_per_minute: u32,
    pub cache_ttl_secs: u64,
    pub sync_strategy: SyncStrategy,
}
