//! Synchronization passes.
//!
//! A connector hands [`SyncOrchestrator::sync_data`] a procedure; the
//! orchestrator resolves the strategy, loads the incremental cursor, runs
//! the procedure once and records the completion time.

use crate::config::{IntegrationConfig, SyncStrategy};
use crate::dispatcher::{ApiRequest, RequestDispatcher};
use crate::registry::IntegrationRegistry;
use crate::response::{ApiResponse, SyncResult};
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// Prefix of the last-sync marker keys.
pub const LAST_SYNC_KEY_PREFIX: &str = "last_sync";

/// Default retention of last-sync markers.
pub const DEFAULT_LAST_SYNC_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// What a sync procedure gets to work with.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// The integration as configured when the pass started.
    pub integration: IntegrationConfig,
    /// Effective strategy for this pass.
    pub strategy: SyncStrategy,
    /// Completion time of the last successful pass (incremental only).
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    dispatcher: RequestDispatcher,
}

impl SyncContext {
    /// Makes an API call to the integration being synchronized.
    pub async fn request(&self, request: ApiRequest) -> ApiResponse {
        self.dispatcher
            .make_request(&self.integration.name, request)
            .await
    }

    /// Handle for calls to other integrations.
    #[must_use]
    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
}

/// Runs sync procedures and tracks last-sync markers.
#[derive(Clone)]
pub struct SyncOrchestrator {
    registry: Arc<IntegrationRegistry>,
    store: Arc<dyn SharedStore>,
    dispatcher: RequestDispatcher,
    retention: Duration,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<IntegrationRegistry>,
        store: Arc<dyn SharedStore>,
        dispatcher: RequestDispatcher,
    ) -> Self {
        Self {
            registry,
            store,
            dispatcher,
            retention: DEFAULT_LAST_SYNC_RETENTION,
        }
    }

    /// Sets how long last-sync markers are kept.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Store key of the last-sync marker for `integration`.
    #[must_use]
    pub fn marker_key(integration: &str) -> String {
        format!("{LAST_SYNC_KEY_PREFIX}:{integration}")
    }

    /// Runs `procedure` once for `integration`.
    ///
    /// Errors and panics raised by the procedure come back as a failed
    /// result. A successful pass records its completion time, which the
    /// next incremental pass receives as `last_sync_timestamp`.
    #[instrument(skip(self, procedure), fields(integration = %integration))]
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
        let Some(entry) = self.registry.get(integration).await else {
            return SyncResult::failed(format!("Integration '{integration}' not found"));
        };
        if !entry.is_enabled() {
            return SyncResult::failed(format!("Integration '{integration}' is disabled"));
        }

        let strategy = if force_full_sync {
            SyncStrategy::FullSync
        } else {
            entry.config().sync_strategy
        };
        let last_sync_timestamp = if strategy == SyncStrategy::Incremental {
            self.last_sync(integration).await
        } else {
            None
        };

        let context = SyncContext {
            integration: entry.snapshot().await,
            strategy,
            last_sync_timestamp,
            dispatcher: self.dispatcher.clone(),
        };

        let started = Instant::now();
        let outcome = AssertUnwindSafe(async move { procedure(context).await })
            .catch_unwind()
            .await;
        let sync_time = started.elapsed();

        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(error = %e, "sync procedure failed");
                SyncResult::failed(format!("Sync failed: {e}"))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(error = %message, "sync procedure panicked");
                SyncResult::failed(format!("Sync failed: {message}"))
            }
        };
        result.sync_time = sync_time;

        if result.success {
            let completed = Utc::now();
            self.record_last_sync(integration, completed).await;
            result.last_sync_timestamp = Some(completed);
            info!(
                strategy = %strategy,
                processed = result.records_processed,
                failed = result.records_failed,
                "sync completed"
            );
        }
        result
    }

    /// Completion time of the last successful pass, if still retained.
    pub async fn last_sync(&self, integration: &str) -> Option<DateTime<Utc>> {
        let key = Self::marker_key(integration);
        let raw = match self.store.get(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %key, error = %e, "last sync lookup failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(timestamp) => Some(timestamp),
            Err(e) => {
                warn!(key = %key, error = %e, "last sync marker is unreadable");
                None
            }
        }
    }

    async fn record_last_sync(&self, integration: &str, completed: DateTime<Utc>) {
        let key = Self::marker_key(integration);
        let raw = match serde_json::to_string(&completed) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "could not encode last sync marker");
                return;
            }
        };
        if let Err(e) = self.store.set(&key, &raw, Some(self.retention)).await {
            warn!(key = %key, error = %e, "could not store last sync marker");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "procedure panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthManager;
    use crate::cache::CacheManager;
    use crate::config::AuthConfig;
    use crate::store::MemoryStore;
    use crate::testing::{MockTransport, UnreachableStore, json_response};
    use crate::transport::Transport;

    struct Harness {
        orchestrator: SyncOrchestrator,
        registry: Arc<IntegrationRegistry>,
        transport: MockTransport,
    }

    async fn harness_with(store: Arc<dyn SharedStore>, config: IntegrationConfig) -> Harness {
        let transport = MockTransport::always(json_response(200, serde_json::json!({"items": []})));
        let shared: Arc<dyn Transport> = Arc::new(transport.clone());
        let registry = Arc::new(IntegrationRegistry::new(
            Arc::clone(&store),
            Duration::from_secs(60),
        ));
        registry.register(config).await.expect("register");
        let dispatcher = RequestDispatcher::new(
            Arc::clone(&registry),
            Arc::new(AuthManager::new(Arc::clone(&shared))),
            CacheManager::new(Arc::clone(&store)),
            shared,
        );
        Harness {
            orchestrator: SyncOrchestrator::new(Arc::clone(&registry), store, dispatcher),
            registry,
            transport,
        }
    }

    async fn harness(strategy: SyncStrategy) -> Harness {
        let config = IntegrationConfig::new("erp", "https://erp.example.com", AuthConfig::api_key("k"))
            .with_sync_strategy(strategy);
        harness_with(Arc::new(MemoryStore::new()), config).await
    }

    async fn observe(h: &Harness, force: bool) -> (SyncStrategy, Option<DateTime<Utc>>, SyncResult) {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let captured = Arc::clone(&seen);
        let result = h
            .orchestrator
            .sync_data(
                "erp",
                move |ctx: SyncContext| async move {
                    *captured.lock().unwrap() = Some((ctx.strategy, ctx.last_sync_timestamp));
                    Ok::<_, String>(SyncResult::succeeded().with_counts(3, 1, 2, 0))
                },
                force,
            )
            .await;
        let (strategy, last) = seen.lock().unwrap().take().expect("procedure ran");
        (strategy, last, result)
    }

    #[tokio::test]
    async fn incremental_resumes_from_last_completion() {
        let h = harness(SyncStrategy::Incremental).await;

        let (_, first_seen, first) = observe(&h, false).await;
        assert!(first.success);
        assert!(first_seen.is_none());
        assert!(first.last_sync_timestamp.is_some());

        let (strategy, second_seen, _) = observe(&h, false).await;
        assert_eq!(strategy, SyncStrategy::Incremental);
        assert_eq!(second_seen, first.last_sync_timestamp);
    }

    #[tokio::test]
    async fn force_full_sync_overrides_strategy() {
        let h = harness(SyncStrategy::Incremental).await;
        observe(&h, false).await;

        let (strategy, last, _) = observe(&h, true).await;
        assert_eq!(strategy, SyncStrategy::FullSync);
        assert!(last.is_none());
    }

    #[tokio::test]
    async fn non_incremental_strategies_get_no_timestamp() {
        let h = harness(SyncStrategy::OnDemand).await;
        observe(&h, false).await;

        let (strategy, last, result) = observe(&h, false).await;
        assert_eq!(strategy, SyncStrategy::OnDemand);
        assert!(last.is_none());
        assert_eq!(result.records_processed, 3);
        assert!(h.orchestrator.last_sync("erp").await.is_some());
    }

    #[tokio::test]
    async fn errors_become_failed_results() {
        let h = harness(SyncStrategy::Incremental).await;

        let result = h
            .orchestrator
            .sync_data(
                "erp",
                |_ctx| async { Err::<SyncResult, _>("boom") },
                false,
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.errors, vec!["Sync failed: boom".to_string()]);
        assert!(result.last_sync_timestamp.is_none());
        assert!(h.orchestrator.last_sync("erp").await.is_none());
    }

    #[tokio::test]
    async fn panics_become_failed_results() {
        let h = harness(SyncStrategy::FullSync).await;

        let result = h
            .orchestrator
            .sync_data(
                "erp",
                |_ctx| async {
                    if true {
                        panic!("boom");
                    }
                    Ok::<_, String>(SyncResult::succeeded())
                },
                false,
            )
            .await;

        assert!(!result.success);
        assert!(result.errors[0].contains("boom"));
    }

    #[tokio::test]
    async fn unsuccessful_results_do_not_advance_the_marker() {
        let h = harness(SyncStrategy::Incremental).await;

        let result = h
            .orchestrator
            .sync_data(
                "erp",
                |_ctx| async { Ok::<_, String>(SyncResult::failed("partial outage")) },
                false,
            )
            .await;

        assert!(!result.success);
        assert!(h.orchestrator.last_sync("erp").await.is_none());
    }

    #[tokio::test]
    async fn unknown_and_disabled_never_run() {
        let h = harness(SyncStrategy::FullSync).await;
        h.registry.set_enabled("erp", false).await;

        for name in ["erp", "missing"] {
            let result = h
                .orchestrator
                .sync_data(
                    name,
                    |_ctx| async { Ok::<_, String>(SyncResult::succeeded()) },
                    false,
                )
                .await;
            assert!(!result.success);
            assert!(!result.errors[0].starts_with("Sync failed"));
        }
        assert_eq!(h.transport.calls(), 0);
    }

    #[tokio::test]
    async fn context_requests_go_to_the_same_integration() {
        let h = harness(SyncStrategy::FullSync).await;

        let result = h
            .orchestrator
            .sync_data(
                "erp",
                |ctx| async move {
                    let response = ctx.request(ApiRequest::get("items")).await;
                    if !response.success {
                        return Err(response.error.unwrap_or_default());
                    }
                    Ok(SyncResult::succeeded().with_counts(1, 1, 0, 0))
                },
                false,
            )
            .await;

        assert!(result.success);
        assert_eq!(h.transport.calls_to("https://erp.example.com/items"), 1);
    }

    #[tokio::test]
    async fn unreadable_store_means_no_cursor() {
        let config = IntegrationConfig::new("erp", "https://erp.example.com", AuthConfig::api_key("k"))
            .with_sync_strategy(SyncStrategy::Incremental);
        let h = harness_with(Arc::new(UnreachableStore), config).await;

        let (strategy, last, result) = observe(&h, false).await;
        assert_eq!(strategy, SyncStrategy::Incremental);
        assert!(last.is_none());
        assert!(result.success);
    }
}
