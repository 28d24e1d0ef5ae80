//! Rate limiting for integration requests.
//!
//! Respects external API constraints with a rolling window kept in the
//! shared store, so every process pointing at the same store shares one
//! budget per integration.

use crate::store::SharedStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Prefix of the rolling-window keys.
pub const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit";

/// Rate limit configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
}

impl RateLimitConfig {
    /// Creates a new rate limit configuration.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Common limit: requests per minute.
    #[must_use]
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed.
    Allowed { remaining: u32 },
    /// Rate limit exceeded.
    Exceeded { limit: u32 },
}

impl RateLimitResult {
    /// Returns true if the request is allowed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Returns the number of remaining requests (0 if exceeded).
    #[must_use]
    pub fn remaining(&self) -> u32 {
        match self {
            Self::Allowed { remaining } => *remaining,
            Self::Exceeded { .. } => 0,
        }
    }
}

/// A rate limiter backed by a sorted set per key.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    config: RateLimitConfig,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a new rate limiter with the given configuration.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Store key holding the window for `key`.
    #[must_use]
    pub fn window_key(key: &str) -> String {
        format!("{RATE_LIMIT_KEY_PREFIX}:{key}")
    }

    /// Checks if a request is allowed for the given key and, if so,
    /// records it.
    ///
    /// Store failures are logged and the request is allowed.
    pub async fn check_and_record(&self, key: &str) -> RateLimitResult {
        let window_key = Self::window_key(key);
        let now = Utc::now().timestamp_millis();
        let window_ms = i64::try_from(self.config.window.as_millis()).unwrap_or(i64::MAX);

        let max = u64::from(self.config.max_requests);
        let member = format!("{now}-{}", ulid::Ulid::new());

        match self
            .store
            .sorted_set_admit(
                &window_key,
                now.saturating_sub(window_ms),
                &member,
                now,
                max,
                self.config.window,
            )
            .await
        {
            Ok(Some(size)) => RateLimitResult::Allowed {
                remaining: u32::try_from(max.saturating_sub(size)).unwrap_or(0),
            },
            Ok(None) => RateLimitResult::Exceeded {
                limit: self.config.max_requests,
            },
            Err(e) => {
                warn!(key, error = %e, "rate limit check failed, allowing request");
                self.fail_open()
            }
        }
    }

    /// Returns true if a request is allowed, recording it when it is.
    pub async fn is_allowed(&self, key: &str) -> bool {
        self.check_and_record(key).await.is_allowed()
    }

    /// Resets the rate limit for a key.
    pub async fn reset(&self, key: &str) {
        if let Err(e) = self.store.delete(&Self::window_key(key)).await {
            warn!(key, error = %e, "rate limit reset failed");
        }
    }

    /// Returns the current configuration.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn fail_open(&self) -> RateLimitResult {
        RateLimitResult::Allowed {
            remaining: self.config.max_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{LatentStore, UnreachableStore};

    fn limiter(max: u32) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()), RateLimitConfig::per_minute(max))
    }

    #[tokio::test]
    async fn rate_limit_allows_under_limit() {
        let limiter = limiter(10);

        for i in 0..10 {
            let result = limiter.check_and_record("test").await;
            assert!(result.is_allowed());
            assert_eq!(result.remaining(), 10 - i - 1);
        }
    }

    #[tokio::test]
    async fn rate_limit_blocks_over_limit() {
        let limiter = limiter(5);

        for _ in 0..5 {
            assert!(limiter.is_allowed("test").await);
        }

        let result = limiter.check_and_record("test").await;
        assert_eq!(result, RateLimitResult::Exceeded { limit: 5 });
        assert_eq!(result.remaining(), 0);
    }

    #[tokio::test]
    async fn rejected_requests_are_not_recorded() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(Arc::new(store.clone()), RateLimitConfig::per_minute(2));

        for _ in 0..5 {
            limiter.is_allowed("acct").await;
        }
        assert_eq!(store.sorted_set_len("rate_limit:acct").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rate_limit_per_key_isolation() {
        let limiter = limiter(2);

        limiter.is_allowed("key1").await;
        limiter.is_allowed("key1").await;

        assert!(!limiter.is_allowed("key1").await);
        assert!(limiter.is_allowed("key2").await);
    }

    #[tokio::test]
    async fn rate_limit_reset() {
        let limiter = limiter(2);

        limiter.is_allowed("test").await;
        limiter.is_allowed("test").await;
        assert!(!limiter.is_allowed("test").await);

        limiter.reset("test").await;
        assert!(limiter.is_allowed("test").await);
    }

    #[tokio::test]
    async fn window_slides() {
        let limiter = RateLimiter::new(
            Arc::new(MemoryStore::new()),
            RateLimitConfig::new(1, Duration::from_millis(100)),
        );

        assert!(limiter.is_allowed("test").await);
        assert!(!limiter.is_allowed("test").await);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.is_allowed("test").await);
    }

    #[tokio::test]
    async fn store_failure_allows_request() {
        let limiter = RateLimiter::new(Arc::new(UnreachableStore), RateLimitConfig::per_minute(1));

        for _ in 0..3 {
            assert!(limiter.is_allowed("test").await);
        }
    }

    #[test]
    fn rate_limit_config_presets() {
        let per_minute = RateLimitConfig::per_minute(100);
        assert_eq!(per_minute.max_requests, 100);
        assert_eq!(per_minute.window, Duration::from_secs(60));

        assert_eq!(RateLimitConfig::default(), RateLimitConfig::per_minute(60));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_callers_never_exceed_limit() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(
            Arc::new(LatentStore::new(store.clone(), Duration::from_millis(1))),
            RateLimitConfig::per_minute(5),
        );

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.is_allowed("acct").await })
            })
            .collect();
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 5);
        assert_eq!(store.sorted_set_len("rate_limit:acct").await.unwrap(), 5);
    }
}
