//! HTTP server: shared state, router, and REST route handlers.

use crate::auth::gate::{self, AuthUser};
use crate::auth::oidc::OidcClient;
use crate::auth::resolver;
use crate::auth::session::{self, SessionStore};
use crate::config::{self, AppMode, Config};
use crate::server::ws;
use crate::store::{ChatStore, SpeechStore, StoreError, UpsertUser, UserStore, UserType};
use crate::support::SupportClient;
use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Shared state for the server (config, stores, session store, clients).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Secret signing the session cookie.
    pub session_secret: String,
    pub users: Arc<UserStore>,
    pub speech: Arc<SpeechStore>,
    pub chat: Arc<ChatStore>,
    pub sessions: Arc<SessionStore>,
    pub support: SupportClient,
    pub oidc: Arc<OidcClient>,
}

impl AppState {
    /// Build state from a config whose env overrides have been applied.
    pub fn new(config: Config, session_secret: String, support_api_key: Option<String>) -> Self {
        let support = SupportClient::new(&config.support, support_api_key);
        let oidc = OidcClient::new(
            config.oidc.issuer_url.clone(),
            config.oidc.client_id.clone(),
            Duration::from_secs(config.oidc.discovery_ttl_secs),
        );
        let sessions = SessionStore::new(config.session.ttl_days);
        Self {
            config: Arc::new(config),
            session_secret,
            users: Arc::new(UserStore::new()),
            speech: Arc::new(SpeechStore::new()),
            chat: Arc::new(ChatStore::new()),
            sessions: Arc::new(sessions),
            support,
            oidc: Arc::new(oidc),
        }
    }
}

/// Router over the given state: public auth routes, gated feature routes,
/// and the WebSocket endpoint.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/auth/user", get(auth_user))
        .route("/api/speech/session", post(speech_session))
        .route("/api/speech/record", post(speech_record))
        .route("/api/speech/assessment", post(speech_assessment))
        .route("/api/speech/progress", get(speech_progress))
        .route("/api/chat/session", post(chat_session))
        .route("/api/chat/message", post(chat_message))
        .route("/api/chat/messages/:id", get(chat_messages))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            gate::require_auth,
        ));

    Router::new()
        .route("/", get(health_http))
        .route("/ws", get(ws::ws_handler))
        .route("/api/auth/login", post(login))
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/session", get(session_debug))
        .route("/api/logout", get(logout))
        .route("/api/login", get(dev_login))
        .merge(protected)
        .with_state(state)
}

/// Run the server; binds to config.server.bind:config.server.port.
/// Production mode requires a session secret. Blocks until shutdown.
pub async fn run_server(mut config: Config) -> Result<()> {
    let session_secret = match config::resolve_session_secret(&config) {
        Some(secret) => secret,
        None => {
            if config.mode == AppMode::Production {
                anyhow::bail!(
                    "refusing to start in production without a session secret \
                     (set SPEAKBRIGHT_SESSION_SECRET or session.secret)"
                );
            }
            log::warn!("no session secret configured, using a dev-only default");
            "speakbright-dev-secret".to_string()
        }
    };

    if let Some(url) = config::resolve_database_url(&config) {
        log::warn!(
            "databaseUrl is configured ({} chars) but this build keeps sessions in memory",
            url.len()
        );
    }

    // Materialize env overrides so everything downstream reads one config.
    config.oidc.issuer_url = config::resolve_issuer_url(&config);
    config.oidc.client_id = config::resolve_client_id(&config);
    config.oidc.domains = config::resolve_domains(&config);
    let support_api_key = config::resolve_support_api_key(&config);

    if config.mode == AppMode::Production {
        if config.oidc.issuer_url.is_none() || config.oidc.client_id.is_none() {
            log::warn!("oidc issuer/client not configured; expired sessions cannot be refreshed");
        }
        if config.oidc.domains.is_empty() {
            log::warn!("no serving domains configured");
        } else {
            log::info!("serving domains: {}", config.oidc.domains.join(", "));
        }
    }

    let bind_addr = format!("{}:{}", config.server.bind, config.server.port);
    let state = AppState::new(config, session_secret, support_api_key);

    {
        let sessions = state.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let removed = sessions.purge_expired().await;
                if removed > 0 {
                    log::debug!("purged {} expired sessions", removed);
                }
            }
        });
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited")?;
    log::info!("server stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "running",
        "mode": state.config.mode,
        "port": state.config.server.port,
    }))
}

fn internal_error(context: &str, err: impl std::fmt::Display) -> Response {
    log::error!("{}: {}", context, err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": "Internal server error" })),
    )
        .into_response()
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": format!("{} not found", what) })),
    )
        .into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "message": message })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    #[serde(default)]
    email: Option<String>,
}

/// POST /api/auth/login — local login by email; establishes a session and
/// returns the bearer token (the user id).
async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    let email = req.email.unwrap_or_default();
    let Some(user) = state.users.get_by_email(email.trim()).await else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Invalid credentials" })),
        )
            .into_response();
    };
    let sid = state.sessions.create(&user.id).await;
    let cookie = session::set_cookie_header(
        &state.session_secret,
        &sid,
        state.config.session.ttl_days,
    );
    log::info!("user {} logged in", user.id);
    let auth_token = user.id.clone();
    (
        [(SET_COOKIE, cookie)],
        Json(json!({ "success": true, "user": user, "authToken": auth_token })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupRequest {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    user_type: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

fn parse_user_type(raw: &str) -> Option<UserType> {
    match raw {
        "adult" => Some(UserType::Adult),
        "child" => Some(UserType::Child),
        "guardian" => Some(UserType::Guardian),
        _ => None,
    }
}

/// POST /api/auth/signup — create (or update) a user and establish a session.
async fn signup(State(state): State<AppState>, Json(req): Json<SignupRequest>) -> Response {
    let email = req.email.as_deref().map(str::trim).unwrap_or_default();
    let first_name = req.first_name.as_deref().map(str::trim).unwrap_or_default();
    let last_name = req.last_name.as_deref().map(str::trim).unwrap_or_default();
    let user_type_raw = req.user_type.as_deref().map(str::trim).unwrap_or_default();
    if email.is_empty() || first_name.is_empty() || last_name.is_empty() || user_type_raw.is_empty()
    {
        return bad_request("email, firstName, lastName and userType are required");
    }
    let Some(user_type) = parse_user_type(user_type_raw) else {
        return bad_request("userType must be one of adult, child, guardian");
    };
    let user = state
        .users
        .upsert(UpsertUser {
            id: None,
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            user_type,
            language: req
                .language
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| "en".to_string()),
        })
        .await;
    let sid = state.sessions.create(&user.id).await;
    let cookie = session::set_cookie_header(
        &state.session_secret,
        &sid,
        state.config.session.ttl_days,
    );
    log::info!("user {} signed up", user.id);
    let auth_token = user.id.clone();
    (
        [(SET_COOKIE, cookie)],
        Json(json!({ "success": true, "user": user, "authToken": auth_token })),
    )
        .into_response()
}

/// GET /api/auth/session — debug dump of the current session state.
async fn session_debug(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let record = match resolver::request_cookie(&headers, session::SESSION_COOKIE)
        .and_then(|raw| session::verify_cookie_value(&state.session_secret, &raw))
    {
        Some(sid) => state.sessions.get(&sid).await,
        None => None,
    };
    let user = match record.as_ref().and_then(|r| r.user_id.clone()) {
        Some(id) => state.users.get(&id).await,
        None => None,
    };
    let is_authenticated = user.is_some();
    Json(json!({
        "session": record,
        "user": user,
        "isAuthenticated": is_authenticated,
    }))
    .into_response()
}

/// GET /api/logout — destroy the session and clear the cookie.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(sid) = resolver::request_cookie(&headers, session::SESSION_COOKIE)
        .and_then(|raw| session::verify_cookie_value(&state.session_secret, &raw))
    {
        state.sessions.destroy(&sid).await;
        log::info!("session {} destroyed on logout", sid);
    }
    (
        [(SET_COOKIE, session::clear_cookie_header())],
        Json(json!({ "success": true })),
    )
        .into_response()
}

fn dashboard_path(user_type: UserType) -> &'static str {
    match user_type {
        UserType::Child => "/child-dashboard",
        UserType::Guardian => "/guardian-dashboard",
        UserType::Adult => "/dashboard",
    }
}

/// GET /api/login — dev-mode mock login. Accepts an optional `signupData`
/// query parameter (JSON) to seed the user; redirects by user type.
async fn dev_login(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if state.config.mode != AppMode::Dev {
        return not_found("Route");
    }
    let fields = query
        .get("signupData")
        .and_then(|raw| match serde_json::from_str::<UpsertUser>(raw) {
            Ok(f) => Some(f),
            Err(e) => {
                log::warn!("ignoring malformed signupData: {}", e);
                None
            }
        })
        .unwrap_or_else(|| UpsertUser {
            id: Some("dev-user".to_string()),
            email: "dev@speakbright.local".to_string(),
            first_name: "Dev".to_string(),
            last_name: "User".to_string(),
            user_type: UserType::Adult,
            language: "en".to_string(),
        });
    let user = state.users.upsert(fields).await;
    let sid = state.sessions.create(&user.id).await;
    let cookie = session::set_cookie_header(
        &state.session_secret,
        &sid,
        state.config.session.ttl_days,
    );
    log::info!("dev login as {} ({:?})", user.id, user.user_type);
    (
        StatusCode::FOUND,
        [
            (LOCATION, dashboard_path(user.user_type).to_string()),
            (SET_COOKIE, cookie),
        ],
    )
        .into_response()
}

/// GET /api/auth/user — current identity (gated).
async fn auth_user(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> Response {
    match state.users.get(&auth.0.id).await {
        Some(user) => Json(user).into_response(),
        None => not_found("User"),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechSessionRequest {
    #[serde(default)]
    exercise_type: Option<String>,
}

/// POST /api/speech/session — create a practice session (gated).
async fn speech_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<SpeechSessionRequest>,
) -> Response {
    let exercise_type = req
        .exercise_type
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "general".to_string());
    let session = state.speech.create_session(&auth.0.id, &exercise_type).await;
    Json(json!({ "success": true, "session": session })).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechRecordRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    accuracy: Option<f64>,
}

/// POST /api/speech/record — store a recording against a session (gated).
async fn speech_record(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<SpeechRecordRequest>,
) -> Response {
    let Some(session_id) = req.session_id.filter(|s| !s.trim().is_empty()) else {
        return bad_request("sessionId is required");
    };
    let transcript = req.transcript.unwrap_or_default();
    let accuracy = req.accuracy.unwrap_or(0.0);
    match state
        .speech
        .add_recording(&session_id, &auth.0.id, &transcript, accuracy)
        .await
    {
        Ok(recording) => Json(json!({ "success": true, "recording": recording })).into_response(),
        Err(StoreError::NotFound(what)) => not_found(what),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssessmentRequest {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// POST /api/speech/assessment — store an assessment (gated).
async fn speech_assessment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<AssessmentRequest>,
) -> Response {
    let Some(level) = req.level.filter(|l| !l.trim().is_empty()) else {
        return bad_request("level is required");
    };
    let assessment = state
        .speech
        .add_assessment(&auth.0.id, level.trim(), req.notes.as_deref().unwrap_or(""))
        .await;
    Json(json!({ "success": true, "assessment": assessment })).into_response()
}

/// GET /api/speech/progress — daily progress entries (gated).
async fn speech_progress(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Response {
    let progress = state.speech.progress(&auth.0.id).await;
    Json(json!({ "progress": progress })).into_response()
}

/// POST /api/chat/session — create a chat session (gated).
async fn chat_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Response {
    let session = state.chat.create_session(&auth.0.id).await;
    Json(json!({ "success": true, "session": session })).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatMessageRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// POST /api/chat/message — append the user message, get a support reply,
/// store and return it (gated).
async fn chat_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<ChatMessageRequest>,
) -> Response {
    let Some(session_id) = req.session_id.filter(|s| !s.trim().is_empty()) else {
        return bad_request("sessionId is required");
    };
    let Some(content) = req.content.filter(|c| !c.trim().is_empty()) else {
        return bad_request("content is required");
    };
    let Some(session) = state.chat.get_session(&session_id).await else {
        return not_found("Chat session");
    };
    if session.user_id != auth.0.id {
        return not_found("Chat session");
    }
    if let Err(e) = state
        .chat
        .append_message(&session_id, "user", &content, None, None)
        .await
    {
        return internal_error("appending user message", e);
    }
    let reply = state.support.analyze(&content).await;
    match state
        .chat
        .append_message(
            &session_id,
            "assistant",
            &reply.response,
            Some(reply.emotion.clone()),
            Some(reply.support_type.clone()),
        )
        .await
    {
        Ok(message) => Json(json!({ "success": true, "message": message })).into_response(),
        Err(e) => internal_error("appending assistant message", e),
    }
}

/// GET /api/chat/messages/:id — messages for an owned chat session (gated).
async fn chat_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(session) = state.chat.get_session(&session_id).await else {
        return not_found("Chat session");
    };
    if session.user_id != auth.0.id {
        return not_found("Chat session");
    }
    match state.chat.messages(&session_id).await {
        Ok(messages) => Json(json!({ "messages": messages })).into_response(),
        Err(e) => internal_error("listing chat messages", e),
    }
}
