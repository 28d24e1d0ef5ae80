//! The framework facade connectors talk to.

use crate::auth::AuthManager;
use crate::cache::{CACHE_KEY_PREFIX, CacheManager};
use crate::config::IntegrationConfig;
use crate::dispatcher::{ApiRequest, RequestDispatcher};
use crate::error::{RegistrationError, StartupError};
use crate::registry::{IntegrationEntry, IntegrationRegistry};
use crate::response::{ApiResponse, IntegrationStatus, SyncResult};
use crate::settings::FrameworkSettings;
use crate::store::{MemoryStore, SharedStore};
use crate::sync::{SyncContext, SyncOrchestrator};
use crate::transport::{ReqwestTransport, Transport};
use rootcause::prelude::Report;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Registry, dispatcher and sync orchestrator behind one handle.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct IntegrationFramework {
    registry: Arc<IntegrationRegistry>,
    transport: Arc<dyn Transport>,
    cache: CacheManager,
    dispatcher: RequestDispatcher,
    sync: SyncOrchestrator,
}

impl std::fmt::Debug for IntegrationFramework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationFramework")
            .field("dispatcher", &self.dispatcher)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl IntegrationFramework {
    /// Creates a framework with default settings.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, transport: Arc<dyn Transport>) -> Self {
        Self::with_settings(store, transport, &FrameworkSettings::default())
    }

    /// Creates a framework tuned by `settings`. The integrations listed in
    /// `settings` are not registered; see [`Self::from_settings`].
    #[must_use]
    pub fn with_settings(
        store: Arc<dyn SharedStore>,
        transport: Arc<dyn Transport>,
        settings: &FrameworkSettings,
    ) -> Self {
        let registry = Arc::new(IntegrationRegistry::new(
            Arc::clone(&store),
            settings.rate_limit_window(),
        ));
        let auth = Arc::new(AuthManager::with_timing(
            Arc::clone(&transport),
            settings.token_refresh_margin(),
            settings.token_request_timeout(),
        ));
        let cache = CacheManager::new(Arc::clone(&store));
        let dispatcher = RequestDispatcher::new(
            Arc::clone(&registry),
            auth,
            cache.clone(),
            Arc::clone(&transport),
        )
        .with_user_agent(settings.user_agent.clone())
        .with_charge_cache_hits(settings.charge_cache_hits);
        let sync = SyncOrchestrator::new(Arc::clone(&registry), store, dispatcher.clone())
            .with_retention(settings.last_sync_retention());

        Self {
            registry,
            transport,
            cache,
            dispatcher,
            sync,
        }
    }

    /// Builds a framework from settings and registers the integrations
    /// they list.
    ///
    /// Uses Redis when `redis_url` is set and the `redis` feature is
    /// enabled, the in-memory store otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or an integration is
    /// rejected.
    pub async fn from_settings(
        settings: &FrameworkSettings,
    ) -> switchyard_core::Result<Self, StartupError> {
        let store = open_store(settings).await?;
        let framework = Self::with_settings(store, Arc::new(ReqwestTransport::new()), settings);
        for config in &settings.integrations {
            framework
                .register_integration(config.clone())
                .await
                .map_err(|e| StartupError::Registration {
                    name: config.name.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(framework)
    }

    /// Registers an integration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the name is
    /// already registered.
    pub async fn register_integration(
        &self,
        config: IntegrationConfig,
    ) -> Result<(), Report<RegistrationError>> {
        self.registry.register(config).await.map(|_| ())
    }

    /// Makes an API call. See [`RequestDispatcher::make_request`].
    pub async fn make_request(&self, integration: &str, request: ApiRequest) -> ApiResponse {
        self.dispatcher.make_request(integration, request).await
    }

    /// Runs a sync procedure. See [`SyncOrchestrator::sync_data`].
    pub async fn sync_data<F, Fut, E>(
        &self,
        integration: &str,
        procedure: F,
        force_full_sync: bool,
    ) -> SyncResult
    where
        F: FnOnce(SyncContext) -> Fut,
        Fut: Future<Output = Result<SyncResult, E>>,
        E: Display,
    {
        self.sync
            .sync_data(integration, procedure, force_full_sync)
            .await
    }

    /// Allows calls to `integration` again. Returns false if unknown.
    pub async fn enable_integration(&self, integration: &str) -> bool {
        self.registry.set_enabled(integration, true).await
    }

    /// Refuses further calls to `integration`. Returns false if unknown.
    pub async fn disable_integration(&self, integration: &str) -> bool {
        self.registry.set_enabled(integration, false).await
    }

    /// Reports the state of `integration`, probing its base URL.
    ///
    /// The probe is a normal uncached GET, so it counts against the rate
    /// limit. Disabled integrations are reported unreachable without a
    /// probe.
    #[instrument(skip(self), fields(integration = %integration))]
    pub async fn get_integration_status(&self, integration: &str) -> Option<IntegrationStatus> {
        let entry = self.registry.get(integration).await?;
        Some(self.status_of(&entry).await)
    }

    /// Reports every integration, sorted by name.
    pub async fn list_integrations(&self) -> Vec<IntegrationStatus> {
        let mut statuses = Vec::new();
        for entry in self.registry.entries().await {
            statuses.push(self.status_of(&entry).await);
        }
        statuses
    }

    async fn status_of(&self, entry: &IntegrationEntry) -> IntegrationStatus {
        let name = entry.name().as_str();
        let probe = self
            .dispatcher
            .make_request(name, ApiRequest::get("").without_cache())
            .await;
        let config = entry.config();
        IntegrationStatus {
            name: name.to_string(),
            enabled: entry.is_enabled(),
            base_url: config.base_url.clone(),
            auth_kind: config.auth.kind,
            connectivity: probe.success,
            last_sync: self.sync.last_sync(name).await,
            rate_limit_per_minute: config.rate_limit_per_minute,
            cache_ttl_secs: config.cache_ttl_secs,
            sync_strategy: config.sync_strategy,
        }
    }

    /// Drops cached responses of one integration, or of all of them.
    ///
    /// Rate-limit windows and last-sync markers are kept. Returns the number
    /// of entries removed.
    pub async fn clear_cache(&self, integration: Option<&str>) -> u64 {
        let prefix = match integration {
            Some(name) => CacheManager::integration_prefix(name),
            None => format!("{CACHE_KEY_PREFIX}:"),
        };
        let removed = self.cache.clear_prefix(&prefix).await;
        info!(prefix = %prefix, removed, "cache cleared");
        removed
    }

    /// Empties the rate-limit window of `integration`. Returns false if
    /// unknown.
    pub async fn reset_rate_limit(&self, integration: &str) -> bool {
        let Some(entry) = self.registry.get(integration).await else {
            return false;
        };
        entry.limiter().reset(integration).await;
        info!(integration, "rate limit reset");
        true
    }

    /// Handle for making calls, e.g. from connector tasks.
    #[must_use]
    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Releases transport resources.
    pub async fn shutdown(&self) {
        info!("integration framework shutting down");
        self.transport.close().await;
    }
}

async fn open_store(
    settings: &FrameworkSettings,
) -> switchyard_core::Result<Arc<dyn SharedStore>, StartupError> {
    match settings.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = crate::redis_store::RedisStore::connect(url)
                .await
                .map_err(|e| StartupError::Store {
                    reason: e.to_string(),
                })?;
            info!("using redis shared store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            warn!("redis_url is set but the redis feature is disabled, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}
