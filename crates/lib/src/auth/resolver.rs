//! Token/session resolver: turns a request or WebSocket handshake into a
//! caller identity.
//!
//! HTTP precedence: an established session wins; otherwise the bearer token
//! is treated as a user id and looked up. WebSocket handshake precedence:
//! `?token=` query parameter, then the Authorization header. An unknown token
//! is "unresolved", never an error.

use crate::auth::session::{self, SessionRecord, SessionStore};
use crate::store::{User, UserStore};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use std::collections::HashMap;

/// How the caller authenticated.
#[derive(Debug, Clone)]
pub enum Caller {
    /// Cookie-backed session. Carries the live record for expiry checks.
    Session { record: SessionRecord, user: User },
    /// Bearer token (the token value is the user id).
    Bearer { user: User },
}

impl Caller {
    pub fn user(&self) -> &User {
        match self {
            Caller::Session { user, .. } | Caller::Bearer { user } => user,
        }
    }
}

/// Value of the named cookie, if present.
pub fn request_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    for part in raw.split(';') {
        let mut pieces = part.trim().splitn(2, '=');
        let key = pieces.next()?.trim();
        let value = pieces.next()?.trim();
        if key == name && !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

/// Bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Handshake token for the WebSocket: `?token=` first, then Authorization.
pub fn handshake_token(query: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    query
        .get("token")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(headers))
}

/// Resolve a token to a user by treating it as a user id.
pub async fn resolve_token(users: &UserStore, token: &str) -> Option<User> {
    users.get(token).await
}

/// Resolve an HTTP request to a caller: session cookie first, bearer second.
/// Returns None when neither yields a known identity.
pub async fn resolve_request(
    headers: &HeaderMap,
    secret: &str,
    sessions: &SessionStore,
    users: &UserStore,
) -> Option<Caller> {
    if let Some(raw) = request_cookie(headers, session::SESSION_COOKIE) {
        if let Some(sid) = session::verify_cookie_value(secret, &raw) {
            if let Some(record) = sessions.get(&sid).await {
                if let Some(user_id) = record.user_id.clone() {
                    if let Some(user) = users.get(&user_id).await {
                        return Some(Caller::Session { record, user });
                    }
                }
            }
        }
    }
    let token = bearer_token(headers)?;
    resolve_token(users, &token).await.map(|user| Caller::Bearer { user })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{UpsertUser, UserType};
    use axum::http::HeaderValue;

    async fn seeded_users() -> (UserStore, User) {
        let users = UserStore::new();
        let user = users
            .upsert(UpsertUser {
                id: Some("user-42".to_string()),
                email: "mira@example.com".to_string(),
                first_name: "Mira".to_string(),
                last_name: "Osei".to_string(),
                user_type: UserType::Adult,
                language: "en".to_string(),
            })
            .await;
        (users, user)
    }

    #[tokio::test]
    async fn bearer_token_resolves_known_user() {
        let (users, user) = seeded_users().await;
        let resolved = resolve_token(&users, "user-42").await.expect("resolved");
        assert_eq!(resolved.id, user.id);
        assert!(resolve_token(&users, "user-43").await.is_none());
        assert!(resolve_token(&users, "").await.is_none());
    }

    #[tokio::test]
    async fn session_takes_precedence_over_bearer() {
        let (users, _) = seeded_users().await;
        let other = users
            .upsert(UpsertUser {
                id: Some("user-43".to_string()),
                email: "noor@example.com".to_string(),
                first_name: "Noor".to_string(),
                last_name: "Hadid".to_string(),
                user_type: UserType::Guardian,
                language: "en".to_string(),
            })
            .await;
        let sessions = SessionStore::new(7);
        let sid = sessions.create(&other.id).await;

        let mut headers = HeaderMap::new();
        let cookie = format!(
            "{}={}",
            session::SESSION_COOKIE,
            session::cookie_value("secret", &sid)
        );
        headers.insert(COOKIE, HeaderValue::from_str(&cookie).expect("cookie"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer user-42"));

        let caller = resolve_request(&headers, "secret", &sessions, &users)
            .await
            .expect("resolved");
        assert!(matches!(&caller, Caller::Session { user, .. } if user.id == "user-43"));
    }

    #[tokio::test]
    async fn bad_cookie_signature_falls_back_to_bearer() {
        let (users, _) = seeded_users().await;
        let sessions = SessionStore::new(7);
        let sid = sessions.create("user-42").await;

        let mut headers = HeaderMap::new();
        let cookie = format!(
            "{}={}",
            session::SESSION_COOKIE,
            session::cookie_value("wrong-secret", &sid)
        );
        headers.insert(COOKIE, HeaderValue::from_str(&cookie).expect("cookie"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer user-42"));

        let caller = resolve_request(&headers, "secret", &sessions, &users)
            .await
            .expect("resolved");
        assert!(matches!(caller, Caller::Bearer { .. }));
    }

    #[tokio::test]
    async fn unresolved_when_no_credentials() {
        let (users, _) = seeded_users().await;
        let sessions = SessionStore::new(7);
        let headers = HeaderMap::new();
        assert!(resolve_request(&headers, "secret", &sessions, &users)
            .await
            .is_none());
    }

    #[test]
    fn handshake_prefers_query_token() {
        let mut query = HashMap::new();
        query.insert("token".to_string(), "query-id".to_string());
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-id"));
        assert_eq!(
            handshake_token(&query, &headers).as_deref(),
            Some("query-id")
        );
        query.clear();
        assert_eq!(
            handshake_token(&query, &headers).as_deref(),
            Some("header-id")
        );
        headers.clear();
        assert!(handshake_token(&query, &headers).is_none());
    }
}
