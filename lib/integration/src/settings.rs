//! Framework settings.
//!
//! Loaded via the `config` crate from an optional TOML file, overridden by
//! `SWITCHYARD_*` environment variables (`__` separates nested keys, e.g.
//! `SWITCHYARD_REDIS_URL`, `SWITCHYARD_TOKEN_REFRESH_MARGIN_SECS`).

use crate::config::IntegrationConfig;
use crate::dispatcher::DEFAULT_USER_AGENT;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SWITCHYARD";

/// Settings shared by every integration.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameworkSettings {
    /// Redis URL for the shared store. In-memory when unset.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// `User-Agent` sent with every call.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Refresh OAuth2 tokens this many seconds before they expire.
    #[serde(default = "default_token_refresh_margin_secs")]
    pub token_refresh_margin_secs: u64,

    /// Timeout for token endpoint requests, in seconds.
    #[serde(default = "default_token_request_timeout_secs")]
    pub token_request_timeout_secs: u64,

    /// Length of the rate-limit window, in seconds.
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// How long last-sync markers are kept, in seconds.
    #[serde(default = "default_last_sync_retention_secs")]
    pub last_sync_retention_secs: u64,

    /// Whether cache hits count against the rate limit.
    #[serde(default = "default_charge_cache_hits")]
    pub charge_cache_hits: bool,

    /// Integrations registered at start-up.
    #[serde(default)]
    pub integrations: Vec<IntegrationConfig>,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_token_refresh_margin_secs() -> u64 {
    300
}

fn default_token_request_timeout_secs() -> u64 {
    30
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_last_sync_retention_secs() -> u64 {
    86400
}

fn default_charge_cache_hits() -> bool {
    true
}

impl Default for FrameworkSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            user_agent: default_user_agent(),
            token_refresh_margin_secs: default_token_refresh_margin_secs(),
            token_request_timeout_secs: default_token_request_timeout_secs(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            last_sync_retention_secs: default_last_sync_retention_secs(),
            charge_cache_hits: default_charge_cache_hits(),
            integrations: Vec::new(),
        }
    }
}

impl FrameworkSettings {
    /// Loads settings from `file` (TOML) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the
    /// wrong type.
    pub fn load(file: Option<&Path>) -> Result<Self, ::config::ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }
        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Loads settings from the environment only.
    ///
    /// # Errors
    ///
    /// Returns an error if a value has the wrong type.
    pub fn from_env() -> Result<Self, ::config::ConfigError> {
        Self::load(None)
    }

    #[must_use]
    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_secs)
    }

    #[must_use]
    pub fn token_request_timeout(&self) -> Duration {
        Duration::from_secs(self.token_request_timeout_secs)
    }

    #[must_use]
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    #[must_use]
    pub fn last_sync_retention(&self) -> Duration {
        Duration::from_secs(self.last_sync_retention_secs)
    }
}
