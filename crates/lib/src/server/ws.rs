//! Real-time channel: WebSocket lifecycle and frame dispatch.
//!
//! Per-connection states: Connecting -> {Unauthenticated, Authenticated} ->
//! Closed. A handshake token (query `?token=`, else Authorization header)
//! that resolves attaches the identity; one that does not resolve closes the
//! connection with a policy-violation code before any frame is dispatched.
//! Without a token the connection persists and may authenticate later with
//! an in-band `auth` frame. Frames are handled one at a time in arrival
//! order; a processing error answers a generic `error` frame and never
//! closes the connection.

use crate::auth::resolver;
use crate::server::protocol::{AuthData, InboundFrame, OutboundFrame, SpeechPracticeData};
use crate::server::AppState;
use crate::store::User;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use std::collections::HashMap;

/// WebSocket close code for a rejected handshake (policy violation).
const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Per-connection mutable state. Created at accept; the identity is set by a
/// successful handshake and overwritten by a later successful `auth` frame.
#[derive(Debug, Default)]
pub struct ConnContext {
    pub identity: Option<User>,
}

/// Handshake result computed before the upgrade completes.
enum Handshake {
    /// Token resolved (or no token given): proceed with optional identity.
    Accept(Option<User>),
    /// Token given but unknown: close 1008 after the upgrade.
    Reject,
}

/// GET /ws — upgrade to WebSocket. The handshake token is resolved before
/// the upgrade so a bad token closes immediately after accept.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let handshake = match resolver::handshake_token(&query, &headers) {
        Some(token) => match resolver::resolve_token(&state.users, &token).await {
            Some(user) => Handshake::Accept(Some(user)),
            None => Handshake::Reject,
        },
        None => Handshake::Accept(None),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, handshake))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, handshake: Handshake) {
    let mut ctx = ConnContext::default();
    match handshake {
        Handshake::Reject => {
            log::info!("ws handshake rejected: token did not resolve");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "invalid authentication token".into(),
                })))
                .await;
            return;
        }
        Handshake::Accept(identity) => {
            if let Some(user) = &identity {
                log::debug!("ws connection authenticated on handshake: {}", user.id);
            }
            ctx.identity = identity;
        }
    }

    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                log::debug!("ws receive error: {}", e);
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                if let Some(reply) = handle_frame(&mut ctx, &state, &text).await {
                    // Send only while the transport is open; a failed send
                    // means the peer went away and the reply is dropped.
                    let _ = socket.send(Message::Text(reply.to_text())).await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    log::debug!(
        "ws connection closed (user: {})",
        ctx.identity.map(|u| u.id).unwrap_or_else(|| "-".to_string())
    );
}

/// Dispatch one inbound frame; returns the reply to send, if any.
async fn handle_frame(ctx: &mut ConnContext, state: &AppState, text: &str) -> Option<OutboundFrame> {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("ws malformed frame: {}", e);
            return Some(OutboundFrame::error("invalid message format"));
        }
    };
    match frame.typ.as_str() {
        "auth" => {
            let auth: AuthData = serde_json::from_value(frame.data).unwrap_or_default();
            let Some(token) = auth.token.filter(|t| !t.trim().is_empty()) else {
                return Some(OutboundFrame::auth_error("missing token"));
            };
            match resolver::resolve_token(&state.users, token.trim()).await {
                Some(user) => {
                    if let Some(previous) = &ctx.identity {
                        if previous.id != user.id {
                            log::info!(
                                "ws connection re-authenticated: {} -> {}",
                                previous.id,
                                user.id
                            );
                        }
                    }
                    let reply = OutboundFrame::auth_success(&user.id);
                    ctx.identity = Some(user);
                    Some(reply)
                }
                None => Some(OutboundFrame::auth_error("invalid token")),
            }
        }
        "speech_practice" => {
            let data: SpeechPracticeData = serde_json::from_value(frame.data).unwrap_or_default();
            log::debug!(
                "ws speech_practice frame (exercise: {})",
                data.exercise_type.as_deref().unwrap_or("-")
            );
            Some(OutboundFrame::speech_feedback())
        }
        "chat_message" => {
            let Some(content) = frame.content.filter(|c| !c.trim().is_empty()) else {
                return Some(OutboundFrame::error("message content required"));
            };
            let reply = state.support.analyze(&content).await;
            Some(OutboundFrame::ai_response(&reply))
        }
        other => {
            // Unknown types are ignored without a reply.
            log::debug!("ws ignoring unknown frame type: {}", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::{UpsertUser, UserType};

    async fn test_state() -> AppState {
        let state = AppState::new(Config::default(), "test-secret".to_string(), None);
        state
            .users
            .upsert(UpsertUser {
                id: Some("user-1".to_string()),
                email: "kai@example.com".to_string(),
                first_name: "Kai".to_string(),
                last_name: "Ito".to_string(),
                user_type: UserType::Child,
                language: "en".to_string(),
            })
            .await;
        state
    }

    #[tokio::test]
    async fn auth_frame_attaches_identity_and_replies_success() {
        let state = test_state().await;
        let mut ctx = ConnContext::default();
        let reply = handle_frame(
            &mut ctx,
            &state,
            r#"{"type":"auth","data":{"token":"user-1"}}"#,
        )
        .await
        .expect("reply");
        assert_eq!(reply.typ, "auth_success");
        assert_eq!(reply.data["userId"], "user-1");
        assert_eq!(ctx.identity.as_ref().map(|u| u.id.as_str()), Some("user-1"));
    }

    #[tokio::test]
    async fn bad_auth_token_keeps_connection_unauthenticated() {
        let state = test_state().await;
        let mut ctx = ConnContext::default();
        let reply = handle_frame(
            &mut ctx,
            &state,
            r#"{"type":"auth","data":{"token":"nope"}}"#,
        )
        .await
        .expect("reply");
        assert_eq!(reply.typ, "auth_error");
        assert!(ctx.identity.is_none());
    }

    #[tokio::test]
    async fn re_auth_overwrites_identity() {
        let state = test_state().await;
        state
            .users
            .upsert(UpsertUser {
                id: Some("user-2".to_string()),
                email: "ana@example.com".to_string(),
                first_name: "Ana".to_string(),
                last_name: "Reyes".to_string(),
                user_type: UserType::Adult,
                language: "es".to_string(),
            })
            .await;
        let mut ctx = ConnContext::default();
        handle_frame(
            &mut ctx,
            &state,
            r#"{"type":"auth","data":{"token":"user-1"}}"#,
        )
        .await;
        handle_frame(
            &mut ctx,
            &state,
            r#"{"type":"auth","data":{"token":"user-2"}}"#,
        )
        .await;
        assert_eq!(ctx.identity.as_ref().map(|u| u.id.as_str()), Some("user-2"));
    }

    #[tokio::test]
    async fn malformed_json_answers_error_and_keeps_going() {
        let state = test_state().await;
        let mut ctx = ConnContext::default();
        let reply = handle_frame(&mut ctx, &state, "{not json").await.expect("reply");
        assert_eq!(reply.typ, "error");
        // The next valid frame is processed normally.
        let reply = handle_frame(&mut ctx, &state, r#"{"type":"speech_practice"}"#)
            .await
            .expect("reply");
        assert_eq!(reply.typ, "speech_feedback");
    }

    #[tokio::test]
    async fn chat_message_yields_ai_response() {
        let state = test_state().await;
        let mut ctx = ConnContext::default();
        let reply = handle_frame(
            &mut ctx,
            &state,
            r#"{"type":"chat_message","content":"I had a hard day"}"#,
        )
        .await
        .expect("reply");
        assert_eq!(reply.typ, "ai_response");
        assert!(reply.data.get("response").is_some());
        assert!(reply.data.get("emotion").is_some());
        assert!(reply.data.get("supportType").is_some());
    }

    #[tokio::test]
    async fn unknown_frame_type_is_ignored() {
        let state = test_state().await;
        let mut ctx = ConnContext::default();
        let reply = handle_frame(&mut ctx, &state, r#"{"type":"telemetry","data":{}}"#).await;
        assert!(reply.is_none());
    }
}
