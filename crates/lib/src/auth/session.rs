//! HTTP session store and the signed session cookie.
//!
//! Sessions are an in-memory sid -> record map with a one-week default
//! time-to-live, checked lazily on read. The cookie value is `sid.sig` where
//! sig is a SHA-256 digest over the secret and sid, so a tampered sid fails
//! verification without a store lookup.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cookie holding the signed session id.
pub const SESSION_COOKIE: &str = "speakbright_sid";

/// Identity-provider claims kept on the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    /// Subject: the user id.
    pub sub: String,
}

/// One HTTP session. Token fields are set only by the production OIDC flow;
/// they are withheld from serialized debug output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub sid: String,
    pub user_id: Option<String>,
    pub claims: Option<SessionClaims>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    /// Access-token expiry, epoch seconds. None in dev mode.
    pub expires_at: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Fields replaced on the session after a successful token refresh.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub claims: Option<SessionClaims>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

/// In-memory store for HTTP sessions (create, get with TTL check, update, destroy).
pub struct SessionStore {
    ttl: Duration,
    inner: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionStore {
    /// Store with the given session time-to-live in days.
    pub fn new(ttl_days: i64) -> Self {
        Self {
            ttl: Duration::days(ttl_days),
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session bound to a user; returns the new sid.
    pub async fn create(&self, user_id: &str) -> String {
        let sid = format!("sid-{}", uuid::Uuid::new_v4());
        let record = SessionRecord {
            sid: sid.clone(),
            user_id: Some(user_id.to_string()),
            claims: Some(SessionClaims {
                sub: user_id.to_string(),
            }),
            access_token: None,
            refresh_token: None,
            expires_at: None,
            created_at: Utc::now(),
        };
        self.inner.write().await.insert(sid.clone(), record);
        sid
    }

    /// Return the session if it exists and has not outlived its TTL.
    /// Expired sessions are removed on the way out.
    pub async fn get(&self, sid: &str) -> Option<SessionRecord> {
        let expired = {
            let g = self.inner.read().await;
            match g.get(sid) {
                Some(r) => r.created_at + self.ttl < Utc::now(),
                None => return None,
            }
        };
        if expired {
            self.inner.write().await.remove(sid);
            log::debug!("session {} expired past ttl", sid);
            return None;
        }
        self.inner.read().await.get(sid).cloned()
    }

    /// Replace the token fields after a refresh; no-op when the sid is gone.
    pub async fn update_tokens(&self, sid: &str, tokens: SessionTokens) {
        let mut g = self.inner.write().await;
        if let Some(record) = g.get_mut(sid) {
            if tokens.claims.is_some() {
                record.claims = tokens.claims;
            }
            record.access_token = tokens.access_token;
            record.refresh_token = tokens.refresh_token;
            record.expires_at = tokens.expires_at;
        }
    }

    /// Destroy the session (logout). Removing an unknown sid is a no-op.
    pub async fn destroy(&self, sid: &str) {
        self.inner.write().await.remove(sid);
    }

    /// Drop every session past its TTL; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let cutoff = Utc::now();
        let mut g = self.inner.write().await;
        let before = g.len();
        g.retain(|_, r| r.created_at + self.ttl >= cutoff);
        before - g.len()
    }
}

fn sign(secret: &str, sid: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b".");
    hasher.update(sid.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Cookie value for a sid: `sid.sig`.
pub fn cookie_value(secret: &str, sid: &str) -> String {
    format!("{}.{}", sid, sign(secret, sid))
}

/// Verify a cookie value and return the sid, or None when missing/tampered.
pub fn verify_cookie_value(secret: &str, value: &str) -> Option<String> {
    let (sid, sig) = value.rsplit_once('.')?;
    if sig == sign(secret, sid) {
        Some(sid.to_string())
    } else {
        None
    }
}

/// Set-Cookie header value establishing the session cookie.
pub fn set_cookie_header(secret: &str, sid: &str, ttl_days: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        cookie_value(secret, sid),
        ttl_days * 24 * 60 * 60
    )
}

/// Set-Cookie header value clearing the session cookie.
pub fn clear_cookie_header() -> String {
    format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        SESSION_COOKIE
    )
}
