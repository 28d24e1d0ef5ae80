//! Response cache on top of the shared store.
//!
//! Every operation fails soft: store errors are logged and read as a miss
//! or ignored, so a broken cache never breaks a request.

use crate::store::SharedStore;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Prefix shared by all cached responses.
pub const CACHE_KEY_PREFIX: &str = "cache";

/// Cache manager for API responses.
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn SharedStore>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager").finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Creates a cache over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Returns the cached value, or `None` on a miss or store error.
    pub async fn get(&self, key: &str) -> Option<JsonValue> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "cache get failed");
                return None;
            }
        };
        match serde_json::from_str::<JsonValue>(&raw) {
            Ok(JsonValue::Null) => None,
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "cached value is not valid JSON");
                None
            }
        }
    }

    /// Stores a value for `ttl`. `null` values are not stored.
    pub async fn set(&self, key: &str, value: &JsonValue, ttl: Duration) {
        if value.is_null() {
            return;
        }
        let raw = value.to_string();
        if let Err(e) = self.store.set(key, &raw, Some(ttl)).await {
            warn!(key, error = %e, "cache set failed");
        }
    }

    /// Removes a cached value.
    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(key, error = %e, "cache delete failed");
        }
    }

    /// Removes every cached value whose key starts with `prefix`.
    ///
    /// Returns the number of entries removed (0 on store error).
    pub async fn clear_prefix(&self, prefix: &str) -> u64 {
        match self.store.delete_prefix(prefix).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(prefix, error = %e, "cache clear failed");
                0
            }
        }
    }

    /// Builds the cache key for a request.
    ///
    /// `params` is a sorted map, so two requests with the same parameters
    /// produce the same key regardless of the order they were supplied in.
    /// Leading slashes on `endpoint` are ignored, as they are for the URL.
    #[must_use]
    pub fn generate_key(
        integration: &str,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> String {
        let endpoint = endpoint.trim_start_matches('/');
        let mut key = format!("{}:{integration}:{endpoint}", CACHE_KEY_PREFIX);
        if !params.is_empty() {
            // BTreeMap serializes in key order.
            let canonical = serde_json::to_string(params).unwrap_or_default();
            let digest = Sha256::digest(canonical.as_bytes());
            key.push(':');
            key.push_str(&hex::encode(digest));
        }
        key
    }

    /// Key prefix covering all cached responses of one integration.
    #[must_use]
    pub fn integration_prefix(integration: &str) -> String {
        format!("{}:{integration}:", CACHE_KEY_PREFIX)
    }
}
