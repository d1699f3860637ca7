//! Access tokens for Azure-protected APIs

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::http;
use crate::error::Result;

/// Default Azure AD authority
pub const AZURE_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(120);

/// Source of bearer tokens for a scope
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, scope: &str) -> Result<String>;
}

/// A fixed token handed over through the environment
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self, _scope: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Service principal credentials
#[derive(Clone)]
pub struct ServicePrincipal {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ServicePrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePrincipal")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// OAuth2 client-credentials flow against Azure AD, cached per scope
pub struct AzureCredential {
    http: reqwest::Client,
    authority: String,
    principal: ServicePrincipal,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl AzureCredential {
    pub fn new(http: reqwest::Client, principal: ServicePrincipal) -> Self {
        Self::with_authority(http, AZURE_AUTHORITY, principal)
    }

    pub fn with_authority(
        http: reqwest::Client,
        authority: impl Into<String>,
        principal: ServicePrincipal,
    ) -> Self {
        Self {
            http,
            authority: authority.into().trim_end_matches('/').to_string(),
            principal,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn request_token(&self, scope: &str) -> Result<CachedToken> {
        let url = format!("{}/{}/oauth2/v2.0/token", self.authority, self.principal.tenant_id);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.principal.client_id.as_str()),
            ("client_secret", self.principal.client_secret.as_str()),
            ("scope", scope),
        ];
        let response = self.http.post(&url).form(&form).send().await?;
        let response = http::check(response, "token").await?;
        let token: TokenResponse = http::json(response).await?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        debug!(scope = %scope, lifetime_secs = lifetime.as_secs(), "Acquired access token");
        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait]
impl TokenSource for AzureCredential {
    async fn token(&self, scope: &str) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(scope) {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        let fresh = self.request_token(scope).await?;
        let value = fresh.value.clone();
        cache.insert(scope.to_string(), fresh);
        Ok(value)
    }
}
