//! Integration and authentication configuration.
//!
//! An [`IntegrationConfig`] is registered once per external system. It can
//! be built in code with the `with_*` methods or deserialized from the
//! settings file (see [`FrameworkSettings`](crate::settings::FrameworkSettings)).

use chrono::{DateTime, Duration, Utc};
use oauth2::{AccessToken, ClientSecret, RefreshToken};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// How requests to an integration are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    /// Static API key.
    ApiKey,
    /// OAuth 2.0 access token with refresh.
    Oauth2,
    /// HTTP basic authentication with client id and secret.
    BasicAuth,
    /// Static bearer token.
    BearerToken,
    /// Caller-supplied header map.
    Custom,
}

impl AuthKind {
    /// Returns the configuration name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::Oauth2 => "oauth2",
            Self::BasicAuth => "basic_auth",
            Self::BearerToken => "bearer_token",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for AuthKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication settings for one integration.
///
/// Token fields are mutated in place by the OAuth2 refresh path only.
/// Secrets use the `oauth2` newtypes so `Debug` output never reveals them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Authentication kind.
    pub kind: AuthKind,
    /// API key (for `api_key`).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Header carrying the API key. `Authorization: Bearer` when unset.
    #[serde(default)]
    pub api_key_header: Option<String>,
    /// Client id (OAuth2 refresh, basic auth username).
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret (OAuth2 refresh, basic auth password).
    #[serde(default)]
    pub client_secret: Option<ClientSecret>,
    /// Current access token (bearer, OAuth2).
    #[serde(default)]
    pub access_token: Option<AccessToken>,
    /// OAuth2 refresh token.
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    /// When the access token expires.
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,
    /// OAuth2 authorization endpoint (informational; the interactive flow
    /// is owned by the connector).
    #[serde(default)]
    pub auth_url: Option<String>,
    /// OAuth2 token endpoint used for refreshes.
    #[serde(default)]
    pub token_url: Option<String>,
    /// OAuth2 scope sent with refresh requests.
    #[serde(default)]
    pub scope: Option<String>,
    /// Headers sent verbatim for `custom`.
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

impl AuthConfig {
    fn empty(kind: AuthKind) -> Self {
        Self {
            kind,
            api_key: None,
            api_key_header: None,
            client_id: None,
            client_secret: None,
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
            auth_url: None,
            token_url: None,
            scope: None,
            custom_headers: HashMap::new(),
        }
    }

    /// API key sent as `Authorization: Bearer <key>`.
    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::empty(AuthKind::ApiKey)
        }
    }

    /// API key sent in a named header (e.g. `X-API-Key`).
    #[must_use]
    pub fn api_key_in_header(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            api_key_header: Some(header.into()),
            ..Self::api_key(key)
        }
    }

    /// Static bearer token.
    #[must_use]
    pub fn bearer_token(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(AccessToken::new(token.into())),
            ..Self::empty(AuthKind::BearerToken)
        }
    }

    /// HTTP basic authentication.
    #[must_use]
    pub fn basic_auth(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            client_secret: Some(ClientSecret::new(client_secret.into())),
            ..Self::empty(AuthKind::BasicAuth)
        }
    }

    /// OAuth2 with an initial access token.
    #[must_use]
    pub fn oauth2(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(AccessToken::new(access_token.into())),
            ..Self::empty(AuthKind::Oauth2)
        }
    }

    /// Custom header map.
    #[must_use]
    pub fn custom(headers: HashMap<String, String>) -> Self {
        Self {
            custom_headers: headers,
            ..Self::empty(AuthKind::Custom)
        }
    }

    /// Sets the refresh token and token endpoint.
    #[must_use]
    pub fn with_refresh(mut self, refresh_token: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.refresh_token = Some(RefreshToken::new(refresh_token.into()));
        self.token_url = Some(token_url.into());
        self
    }

    /// Sets the OAuth2 client credentials.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(ClientSecret::new(client_secret.into()));
        self
    }

    /// Sets the access token expiry.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.token_expires_at = Some(expires_at);
        self
    }

    /// Sets the OAuth2 scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Checks if the OAuth2 access token expires within `margin` of now.
    #[must_use]
    pub fn needs_refresh(&self, margin: Duration) -> bool {
        if self.kind != AuthKind::Oauth2 {
            return false;
        }
        let horizon = Utc::now().checked_add_signed(margin);
        self.token_expires_at
            .is_some_and(|expires| horizon.is_none_or(|horizon| expires <= horizon))
    }
}

/// Data synchronization strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Re-read everything.
    FullSync,
    /// Only changes since the last successful sync.
    Incremental,
    /// Push-driven; the connector keeps its own cursor.
    RealTime,
    /// Run only when asked.
    #[default]
    OnDemand,
}

impl SyncStrategy {
    /// Returns the configuration name of this strategy.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullSync => "full_sync",
            Self::Incremental => "incremental",
            Self::RealTime => "real_time",
            Self::OnDemand => "on_demand",
        }
    }
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for one external system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Unique name; also the key prefix in the shared store.
    pub name: String,
    /// Base URL that endpoints are resolved against.
    pub base_url: String,
    /// Authentication settings.
    pub auth: AuthConfig,
    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Exponential backoff factor in seconds.
    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,
    /// Calls allowed per rolling rate-limit window.
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    /// How long GET responses stay cached, in seconds. Zero disables caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Default synchronization strategy.
    #[serde(default)]
    pub sync_strategy: SyncStrategy,
    /// Suggested interval between scheduled syncs, in seconds.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Whether calls are currently allowed.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Connector-specific settings, opaque to the framework.
    #[serde(default)]
    pub custom_config: Map<String, JsonValue>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_factor() -> f64 {
    0.3
}

fn default_rate_limit_per_minute() -> u32 {
    60
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_sync_interval_secs() -> u64 {
    3600
}

fn default_enabled() -> bool {
    true
}

impl IntegrationConfig {
    /// Creates a configuration with defaults for everything but identity,
    /// location and authentication.
    #[must_use]
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, auth: AuthConfig) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            auth,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_factor: default_retry_backoff_factor(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            cache_ttl_secs: default_cache_ttl_secs(),
            sync_strategy: SyncStrategy::default(),
            sync_interval_secs: default_sync_interval_secs(),
            enabled: default_enabled(),
            custom_config: Map::new(),
        }
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, backoff_factor: f64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_factor = backoff_factor;
        self
    }

    #[must_use]
    pub fn with_rate_limit_per_minute(mut self, limit: u32) -> Self {
        self.rate_limit_per_minute = limit;
        self
    }

    #[must_use]
    pub fn with_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    #[must_use]
    pub fn with_sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.sync_strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_sync_interval_secs(mut self, secs: u64) -> Self {
        self.sync_interval_secs = secs;
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adds a connector-specific setting.
    #[must_use]
    pub fn with_custom(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.custom_config.insert(key.into(), value);
        self
    }

    /// Per-attempt timeout.
    #[must_use]
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    /// Cache TTL, or `None` when caching is disabled.
    #[must_use]
    pub fn cache_ttl(&self) -> Option<std::time::Duration> {
        (self.cache_ttl_secs > 0).then(|| std::time::Duration::from_secs(self.cache_ttl_secs))
    }

    /// Resolves an endpoint path against the base URL.
    #[must_use]
    pub fn url_for(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}
