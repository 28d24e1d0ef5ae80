//! Integration framework for switchyard connectors.
//!
//! This crate provides:
//!
//! - **Registry**: Named integrations with live enable/disable
//! - **Dispatcher**: Authenticated, rate-limited, cached API calls with
//!   bounded retries
//! - **Auth manager**: Static credentials and OAuth2 refresh with one
//!   refresh in flight per integration
//! - **Sync orchestrator**: Full and incremental synchronization passes
//! - **Shared store**: In-memory or Redis-backed state for rate limits,
//!   cached responses and last-sync markers
//!
//! Per-call outcomes are values ([`ApiResponse`], [`SyncResult`]); only
//! registration and start-up return errors.

pub mod auth;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod framework;
pub mod rate_limit;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod registry;
pub mod response;
pub mod settings;
pub mod store;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod testing;

pub use auth::AuthManager;
pub use cache::CacheManager;
pub use config::{AuthConfig, AuthKind, IntegrationConfig, SyncStrategy};
pub use dispatcher::{ApiRequest, RequestDispatcher};
pub use error::{RegistrationError, StartupError, StoreError, TransportError};
pub use framework::IntegrationFramework;
pub use rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use registry::{IntegrationEntry, IntegrationRegistry};
pub use response::{ApiResponse, IntegrationStatus, SyncResult};
pub use settings::FrameworkSettings;
pub use store::{MemoryStore, SharedStore};
pub use sync::{SyncContext, SyncOrchestrator};
pub use transport::{
    RequestBody, ReqwestTransport, Transport, TransportRequest, TransportResponse,
};
