//! Auth gate: middleware guarding protected routes.
//!
//! Dev mode admits any resolved identity. Production mode additionally
//! requires the session's token expiry to be in the future; an expired
//! session gets exactly one refresh attempt against the identity provider
//! before the request is rejected. The gate mutates only the in-memory
//! session record, never the user store.

use crate::auth::oidc;
use crate::auth::resolver::{self, Caller};
use crate::auth::session::{SessionClaims, SessionRecord, SessionTokens};
use crate::config::AppMode;
use crate::server::AppState;
use crate::store::User;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

/// Authenticated caller identity, inserted into request extensions by the gate.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// What to do with a production-mode session given its expiry state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Freshness {
    Admit,
    Refresh { refresh_token: String },
    Reject(&'static str),
}

/// Expiry policy: admit while `now <= expires_at`; expired sessions may
/// refresh once when a refresh token is present. Sessions without an expiry
/// (local logins) carry nothing to refresh and are admitted.
fn session_freshness(record: &SessionRecord, now: i64) -> Freshness {
    let Some(expires_at) = record.expires_at else {
        return Freshness::Admit;
    };
    if now <= expires_at {
        return Freshness::Admit;
    }
    match record.refresh_token.clone() {
        Some(refresh_token) => Freshness::Refresh { refresh_token },
        None => Freshness::Reject("session expired and no refresh token present"),
    }
}

fn unauthorized(detail: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "Unauthorized", "detail": detail })),
    )
        .into_response()
}

/// Middleware applied to protected routes via `middleware::from_fn_with_state`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let caller = resolver::resolve_request(
        request.headers(),
        &state.session_secret,
        &state.sessions,
        &state.users,
    )
    .await;
    let Some(caller) = caller else {
        return unauthorized("no session or bearer token");
    };

    let user = match (state.config.mode, &caller) {
        (AppMode::Dev, _) | (AppMode::Production, Caller::Bearer { .. }) => caller.user().clone(),
        (AppMode::Production, Caller::Session { record, user }) => {
            match session_freshness(record, Utc::now().timestamp()) {
                Freshness::Admit => user.clone(),
                Freshness::Reject(detail) => return unauthorized(detail),
                Freshness::Refresh { refresh_token } => {
                    match refresh_session(&state, record, &refresh_token).await {
                        Ok(()) => user.clone(),
                        Err(detail) => return unauthorized(detail),
                    }
                }
            }
        }
    };

    request.extensions_mut().insert(AuthUser(user));
    next.run(request).await
}

/// One refresh attempt; on success the session's token fields are replaced.
async fn refresh_session(
    state: &AppState,
    record: &SessionRecord,
    refresh_token: &str,
) -> Result<(), &'static str> {
    let tokens = match state.oidc.refresh(refresh_token).await {
        Ok(t) => t,
        Err(e) => {
            log::warn!("token refresh failed for session {}: {}", record.sid, e);
            return Err("session expired and refresh failed");
        }
    };
    let expires_at = tokens.expires_in.map(|s| Utc::now().timestamp() + s);
    let claims = tokens
        .id_token
        .as_deref()
        .and_then(oidc::id_token_subject)
        .map(|sub| SessionClaims { sub });
    state
        .sessions
        .update_tokens(
            &record.sid,
            SessionTokens {
                claims,
                access_token: Some(tokens.access_token),
                // Providers that do not rotate the refresh token omit it.
                refresh_token: tokens
                    .refresh_token
                    .or_else(|| Some(refresh_token.to_string())),
                expires_at,
            },
        )
        .await;
    log::info!("session {} refreshed", record.sid);
    Ok(())
}
