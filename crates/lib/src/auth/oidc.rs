//! OIDC identity-provider client: cached discovery and token refresh.
//!
//! Discovery is fetched from `{issuer}/.well-known/openid-configuration` and
//! held behind an explicit time-bounded cache rather than one-shot
//! memoization, so a provider rollover is picked up within the cache TTL.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Subset of the provider discovery document this layer uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// Token-endpoint response for a refresh grant.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub id_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    #[error("oidc not configured (issuer url or client id missing)")]
    NotConfigured,
    #[error("oidc request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("oidc provider error: {0}")]
    Api(String),
}

/// Time-bounded cache for the discovery document.
struct DiscoveryCache {
    ttl: Duration,
    cached: RwLock<Option<(Instant, DiscoveryDocument)>>,
}

impl DiscoveryCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: RwLock::new(None),
        }
    }

    async fn get(&self) -> Option<DiscoveryDocument> {
        let g = self.cached.read().await;
        match &*g {
            Some((at, doc)) if at.elapsed() < self.ttl => Some(doc.clone()),
            _ => None,
        }
    }

    async fn put(&self, doc: DiscoveryDocument) {
        *self.cached.write().await = Some((Instant::now(), doc));
    }
}

/// Client for the configured identity provider.
pub struct OidcClient {
    issuer_url: Option<String>,
    client_id: Option<String>,
    client: reqwest::Client,
    discovery: DiscoveryCache,
}

impl OidcClient {
    pub fn new(
        issuer_url: Option<String>,
        client_id: Option<String>,
        discovery_ttl: Duration,
    ) -> Self {
        Self {
            issuer_url: issuer_url.map(|u| u.trim_end_matches('/').to_string()),
            client_id,
            client: reqwest::Client::new(),
            discovery: DiscoveryCache::new(discovery_ttl),
        }
    }

    /// True when both issuer and client id are configured.
    pub fn configured(&self) -> bool {
        self.issuer_url.is_some() && self.client_id.is_some()
    }

    /// Discovery document, served from cache while fresh.
    pub async fn discover(&self) -> Result<DiscoveryDocument, OidcError> {
        if let Some(doc) = self.discovery.get().await {
            return Ok(doc);
        }
        let issuer = self.issuer_url.as_deref().ok_or(OidcError::NotConfigured)?;
        let url = format!("{}/.well-known/openid-configuration", issuer);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OidcError::Api(format!("discovery: {} {}", status, body)));
        }
        let doc: DiscoveryDocument = res.json().await?;
        self.discovery.put(doc.clone()).await;
        Ok(doc)
    }

    /// Exchange a refresh token for new tokens. One attempt, no retry.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, OidcError> {
        let client_id = self.client_id.as_deref().ok_or(OidcError::NotConfigured)?;
        let doc = self.discover().await?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];
        let res = self
            .client
            .post(&doc.token_endpoint)
            .form(&form)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OidcError::Api(format!("refresh: {} {}", status, body)));
        }
        let tokens: TokenResponse = res.json().await?;
        Ok(tokens)
    }
}

/// Subject claim from an id token payload. Does not verify the signature;
/// only pass tokens received directly from the token endpoint.
pub fn id_token_subject(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("sub").and_then(|s| s.as_str()).map(String::from)
}
