//! Authentication headers and OAuth2 token refresh.
//!
//! Static kinds map straight to headers. OAuth2 tokens close to expiry are
//! refreshed first, with at most one refresh in flight per integration.

use crate::config::{AuthConfig, AuthKind};
use crate::transport::{RequestBody, Transport, TransportRequest};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use oauth2::TokenResponse;
use oauth2::basic::BasicTokenResponse;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Default margin before expiry at which OAuth2 tokens are refreshed.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Default timeout for token endpoint requests.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds auth headers and keeps OAuth2 tokens fresh.
pub struct AuthManager {
    transport: Arc<dyn Transport>,
    refresh_margin: chrono::Duration,
    token_timeout: Duration,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("refresh_margin", &self.refresh_margin)
            .field("token_timeout", &self.token_timeout)
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    /// Creates a manager that sends token requests through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_timing(transport, DEFAULT_REFRESH_MARGIN, DEFAULT_TOKEN_TIMEOUT)
    }

    /// Creates a manager with a custom refresh margin and token timeout.
    #[must_use]
    pub fn with_timing(
        transport: Arc<dyn Transport>,
        refresh_margin: Duration,
        token_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            refresh_margin: chrono::Duration::from_std(refresh_margin)
                .unwrap_or_else(|_| chrono::Duration::days(365)),
            token_timeout,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the headers authenticating a request to `integration`.
    ///
    /// An OAuth2 token that expires within the refresh margin is refreshed
    /// first. A failed refresh is logged and the current token is used.
    pub async fn get_auth_headers(
        &self,
        integration: &str,
        auth: &RwLock<AuthConfig>,
    ) -> HashMap<String, String> {
        let expiring = {
            let current = auth.read().await;
            current
                .access_token
                .as_ref()
                .filter(|_| current.needs_refresh(self.refresh_margin))
                .map(|token| token.secret().clone())
        };
        if let Some(seen) = expiring {
            self.refresh_replacing(integration, auth, &seen).await;
        }
        build_headers(&*auth.read().await)
    }

    async fn refresh_lock(&self, integration: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        Arc::clone(locks.entry(integration.to_string()).or_default())
    }

    /// Refreshes the OAuth2 access token of `integration` if it is due.
    pub async fn refresh_token(&self, integration: &str, auth: &RwLock<AuthConfig>) {
        let seen = auth
            .read()
            .await
            .access_token
            .as_ref()
            .map(|token| token.secret().clone())
            .unwrap_or_default();
        self.refresh_replacing(integration, auth, &seen).await;
    }

    /// Replaces the access token `seen` by the caller.
    ///
    /// Callers queue on a per-integration lock. Whoever gets it after a
    /// successful refresh finds a different token and returns without a
    /// call, even when the new token is itself inside the refresh margin.
    #[instrument(skip(self, auth, seen), fields(integration = %integration))]
    async fn refresh_replacing(&self, integration: &str, auth: &RwLock<AuthConfig>, seen: &str) {
        let lock = self.refresh_lock(integration).await;
        let _guard = lock.lock().await;

        let current = auth.read().await.clone();
        let live = current.access_token.as_ref().map(|t| t.secret().as_str());
        if live.unwrap_or_default() != seen {
            debug!("token already refreshed");
            return;
        }
        if !current.needs_refresh(self.refresh_margin) {
            debug!("token no longer due for refresh");
            return;
        }
        let (Some(refresh_token), Some(token_url)) = (&current.refresh_token, &current.token_url)
        else {
            warn!("token expiring but no refresh token or token URL configured");
            return;
        };

        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.secret().clone()),
        ];
        if let Some(client_id) = &current.client_id {
            form.push(("client_id".to_string(), client_id.clone()));
        }
        if let Some(client_secret) = &current.client_secret {
            form.push(("client_secret".to_string(), client_secret.secret().clone()));
        }
        if let Some(scope) = &current.scope {
            form.push(("scope".to_string(), scope.clone()));
        }

        let request = TransportRequest {
            method: Method::POST,
            url: token_url.clone(),
            headers: HashMap::from([("Accept".to_string(), "application/json".to_string())]),
            query: Vec::new(),
            body: Some(RequestBody::Form(form)),
            timeout: self.token_timeout,
        };

        let response =
            match tokio::time::timeout(self.token_timeout, self.transport.send(request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!(error = %e, "token refresh request failed");
                    return;
                }
                Err(_) => {
                    warn!("token refresh timed out");
                    return;
                }
            };
        if response.status != 200 {
            warn!(status = response.status, "token endpoint rejected refresh");
            return;
        }
        let token: BasicTokenResponse = match serde_json::from_slice(&response.body) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "token endpoint returned an unreadable response");
                return;
            }
        };

        let expires_at = token
            .expires_in()
            .and_then(|lifetime| chrono::Duration::from_std(lifetime).ok())
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));

        let mut live = auth.write().await;
        live.access_token = Some(token.access_token().clone());
        if let Some(refresh_token) = token.refresh_token() {
            live.refresh_token = Some(refresh_token.clone());
        }
        live.token_expires_at = expires_at;
        info!(expires_at = ?expires_at, "access token refreshed");
    }
}

/// Maps the current auth settings to request headers. Missing credentials
/// produce no headers.
#[must_use]
pub fn build_headers(auth: &AuthConfig) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    match auth.kind {
        AuthKind::ApiKey => {
            if let Some(key) = &auth.api_key {
                match &auth.api_key_header {
                    Some(header) => headers.insert(header.clone(), key.clone()),
                    None => headers.insert("Authorization".to_string(), format!("Bearer {key}")),
                };
            }
        }
        AuthKind::BearerToken | AuthKind::Oauth2 => {
            if let Some(token) = &auth.access_token {
                headers.insert(
                    "Authorization".to_string(),
                    format!("Bearer {}", token.secret()),
                );
            }
        }
        AuthKind::BasicAuth => {
            if let (Some(id), Some(secret)) = (&auth.client_id, &auth.client_secret) {
                let credentials = STANDARD.encode(format!("{id}:{}", secret.secret()));
                headers.insert("Authorization".to_string(), format!("Basic {credentials}"));
            }
        }
        AuthKind::Custom => headers.extend(auth.custom_headers.clone()),
    }
    headers
}
