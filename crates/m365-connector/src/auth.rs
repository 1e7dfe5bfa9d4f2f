//! OAuth2 client credentials authentication with a per-scope token cache.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::{M365Credentials, ProvisionError, ProvisionResult};

/// Source of bearer tokens for remote API calls.
///
/// Implementations must return a token valid for at least the next 60 seconds.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a bearer token for the given scope.
    async fn get_token(&self, scope: &str) -> ProvisionResult<String>;
}

/// OAuth2 token response from the Microsoft identity platform.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    error_description: Option<String>,
}

/// Cached OAuth2 access token.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Returns true if the token is expired or will expire within the grace period.
    fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Cache slot for one scope. `refresh` serializes acquisitions.
#[derive(Debug, Default)]
struct ScopeSlot {
    token: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

/// Token cache for managing OAuth2 access tokens, keyed by scope.
#[derive(Debug)]
pub struct TokenCache {
    credentials: M365Credentials,
    token_url: String,
    http_client: reqwest::Client,
    slots: RwLock<HashMap<String, Arc<ScopeSlot>>>,
    /// Grace period before expiry to trigger refresh (60 seconds).
    grace_period: Duration,
}

impl TokenCache {
    /// Creates a new token cache for the given tenant.
    #[must_use]
    pub fn new(credentials: M365Credentials, login_endpoint: &str, tenant_id: &str) -> Self {
        Self::with_http_client(credentials, login_endpoint, tenant_id, reqwest::Client::new())
    }

    /// Creates a new token cache reusing an existing HTTP client.
    #[must_use]
    pub fn with_http_client(
        credentials: M365Credentials,
        login_endpoint: &str,
        tenant_id: &str,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            credentials,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                login_endpoint.trim_end_matches('/'),
                tenant_id
            ),
            http_client,
            slots: RwLock::new(HashMap::new()),
            grace_period: Duration::seconds(60),
        }
    }

    async fn slot(&self, scope: &str) -> Arc<ScopeSlot> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(scope) {
                return slot.clone();
            }
        }
        let mut slots = self.slots.write().await;
        slots.entry(scope.to_string()).or_default().clone()
    }

    async fn fresh_token(&self, slot: &ScopeSlot) -> Option<String> {
        let cache = slot.token.read().await;
        cache
            .as_ref()
            .filter(|token| !token.is_expired(self.grace_period))
            .map(|token| token.access_token.clone())
    }

    /// Acquires a new access token using client credentials flow.
    #[instrument(skip(self))]
    async fn acquire_token(&self, scope: &str) -> ProvisionResult<CachedToken> {
        use secrecy::ExposeSecret;

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            (
                "client_secret",
                self.credentials.client_secret.expose_secret(),
            ),
            ("scope", scope),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProvisionError::Auth(format!("Token request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProvisionError::Auth(format!(
                "Token request failed with status {status}: {body}"
            )));
        }

        let token_response: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ProvisionError::Auth(format!("Failed to parse token response: {e}")))?;

        let Some(access_token) = token_response.access_token else {
            return Err(ProvisionError::Auth(format!(
                "Token response contained no access token: {}",
                token_response.error_description.unwrap_or_default()
            )));
        };

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in.unwrap_or(3599));

        debug!(
            "Acquired new token, expires at {}",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(CachedToken {
            access_token,
            expires_at,
        })
    }

    /// Invalidates the cached token for a scope, forcing a refresh on next use.
    pub async fn invalidate(&self, scope: &str) {
        let slot = self.slot(scope).await;
        let mut cache = slot.token.write().await;
        *cache = None;
    }
}

#[async_trait]
impl TokenProvider for TokenCache {
    /// Gets a valid access token, refreshing if necessary.
    ///
    /// Concurrent callers for the same scope wait on the refresh lock and
    /// reuse the token acquired by whichever caller got there first.
    #[instrument(skip(self))]
    async fn get_token(&self, scope: &str) -> ProvisionResult<String> {
        let slot = self.slot(scope).await;

        if let Some(token) = self.fresh_token(&slot).await {
            debug!("Using cached token");
            return Ok(token);
        }

        let _refresh = slot.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.fresh_token(&slot).await {
            debug!("Using token refreshed by concurrent caller");
            return Ok(token);
        }

        info!(scope, "Acquiring new token");
        let new_token = self.acquire_token(scope).await?;
        let access_token = new_token.access_token.clone();

        {
            let mut cache = slot.token.write().await;
            *cache = Some(new_token);
        }

        Ok(access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_token_expiry() {
        let token = CachedToken {
            access_token: "test".to_string(),
            expires_at: Utc::now() + Duration::minutes(10),
        };

        assert!(!token.is_expired(Duration::seconds(60)));
        assert!(token.is_expired(Duration::minutes(15)));
    }

    #[test]
    fn test_cached_token_inside_grace_period() {
        let token = CachedToken {
            access_token: "test".to_string(),
            expires_at: Utc::now() + Duration::seconds(30),
        };

        assert!(token.is_expired(Duration::seconds(60)));
    }

    #[test]
    fn test_token_url() {
        let cache = TokenCache::new(
            M365Credentials {
                client_id: "client".into(),
                client_secret: "secret".to_string().into(),
            },
            "https://login.microsoftonline.com/",
            "tenant-1",
        );
        assert_eq!(
            cache.token_url,
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/token"
        );
    }
}
