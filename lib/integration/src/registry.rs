//! Registered integrations and their live state.

use crate::config::{AuthConfig, IntegrationConfig};
use crate::error::RegistrationError;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::store::SharedStore;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use switchyard_core::IntegrationName;
use tokio::sync::RwLock;
use tracing::info;

/// One registered integration.
///
/// The configuration is fixed at registration. Only the enabled flag and
/// the auth tokens change afterwards.
#[derive(Debug)]
pub struct IntegrationEntry {
    name: IntegrationName,
    config: IntegrationConfig,
    enabled: AtomicBool,
    auth: RwLock<AuthConfig>,
    limiter: RateLimiter,
}

impl IntegrationEntry {
    #[must_use]
    pub fn name(&self) -> &IntegrationName {
        &self.name
    }

    /// The configuration as registered.
    #[must_use]
    pub fn config(&self) -> &IntegrationConfig {
        &self.config
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Live auth settings, updated in place by token refreshes.
    #[must_use]
    pub fn auth(&self) -> &RwLock<AuthConfig> {
        &self.auth
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Copies the configuration with the current auth and enabled state.
    pub async fn snapshot(&self) -> IntegrationConfig {
        let mut config = self.config.clone();
        config.auth = self.auth.read().await.clone();
        config.enabled = self.is_enabled();
        config
    }
}

/// Name-keyed collection of integrations.
pub struct IntegrationRegistry {
    entries: RwLock<HashMap<IntegrationName, Arc<IntegrationEntry>>>,
    store: Arc<dyn SharedStore>,
    rate_limit_window: Duration,
}

impl std::fmt::Debug for IntegrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationRegistry")
            .field("rate_limit_window", &self.rate_limit_window)
            .finish_non_exhaustive()
    }
}

impl IntegrationRegistry {
    /// Creates an empty registry whose rate limiters keep their windows in
    /// `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, rate_limit_window: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
            rate_limit_window,
        }
    }

    /// Validates and adds an integration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the name is
    /// already taken. Nothing is registered in that case.
    pub async fn register(
        &self,
        config: IntegrationConfig,
    ) -> Result<Arc<IntegrationEntry>, Report<RegistrationError>> {
        let name = validate(&config)?;

        let mut entries = self.entries.write().await;
        if entries.contains_key(&name) {
            return Err(RegistrationError::AlreadyRegistered {
                name: name.to_string(),
            }
            .into());
        }

        let limiter = RateLimiter::new(
            Arc::clone(&self.store),
            RateLimitConfig::new(config.rate_limit_per_minute, self.rate_limit_window),
        );
        let entry = Arc::new(IntegrationEntry {
            name: name.clone(),
            enabled: AtomicBool::new(config.enabled),
            auth: RwLock::new(config.auth.clone()),
            config,
            limiter,
        });
        entries.insert(name.clone(), Arc::clone(&entry));

        info!(integration = %name, auth = %entry.config.auth.kind, "integration registered");
        Ok(entry)
    }

    /// Looks up an integration by name.
    pub async fn get(&self, name: &str) -> Option<Arc<IntegrationEntry>> {
        self.entries.read().await.get(name).cloned()
    }

    /// Flips the enabled flag. Returns false if the name is unknown.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let Some(entry) = self.get(name).await else {
            return false;
        };
        entry.enabled.store(enabled, Ordering::Release);
        info!(integration = %name, enabled, "integration state changed");
        true
    }

    /// All entries, sorted by name.
    pub async fn entries(&self) -> Vec<Arc<IntegrationEntry>> {
        let mut entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

fn validate(config: &IntegrationConfig) -> Result<IntegrationName, Report<RegistrationError>> {
    let name = IntegrationName::new(config.name.clone()).map_err(|e| {
        RegistrationError::InvalidName {
            name: config.name.clone(),
            reason: e.reason.to_string(),
        }
    })?;

    let invalid_url = |reason: String| RegistrationError::InvalidBaseUrl {
        name: config.name.clone(),
        reason,
    };
    let url = reqwest::Url::parse(&config.base_url).map_err(|e| invalid_url(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid_url(format!("unsupported scheme '{}'", url.scheme())).into());
    }

    let invalid_limit = |field: &'static str, reason: &str| RegistrationError::InvalidLimit {
        name: config.name.clone(),
        field,
        reason: reason.to_string(),
    };
    if config.rate_limit_per_minute == 0 {
        return Err(invalid_limit("rate_limit_per_minute", "must be greater than zero").into());
    }
    if config.timeout_secs == 0 {
        return Err(invalid_limit("timeout_secs", "must be greater than zero").into());
    }
    if !config.retry_backoff_factor.is_finite() || config.retry_backoff_factor < 0.0 {
        return Err(invalid_limit(
            "retry_backoff_factor",
            "must be a non-negative number",
        )
        .into());
    }

    Ok(name)
}
