//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.speakbright/config.json`) and
//! environment. Environment variables override file values so deployments can
//! inject secrets without touching the config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Runtime mode: dev (mock login, relaxed auth) or production (OIDC).
    #[serde(default)]
    pub mode: AppMode,

    /// HTTP + WebSocket server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// HTTP session settings (cookie secret, time-to-live).
    #[serde(default)]
    pub session: SessionConfig,

    /// OIDC identity-provider settings (production mode).
    #[serde(default)]
    pub oidc: OidcConfig,

    /// Support/completion API settings for emotional-support replies.
    #[serde(default)]
    pub support: SupportConfig,

    /// External session database URL. This build keeps sessions in memory;
    /// when set, a warning is logged at startup.
    pub database_url: Option<String>,
}

/// Runtime mode: dev vs production branches auth behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    /// Local development: mock login route enabled, no token expiry checks.
    #[default]
    Dev,

    /// Production: session tokens carry an expiry; expired sessions get one
    /// refresh attempt against the identity provider.
    Production,
}

/// Server bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for HTTP and WebSocket (default 5000).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,
}

fn default_server_port() -> u16 {
    5000
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
        }
    }
}

/// HTTP session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Secret used to sign the session cookie. Overridden by
    /// SPEAKBRIGHT_SESSION_SECRET env. Required in production mode.
    pub secret: Option<String>,

    /// Session time-to-live in days (default 7).
    #[serde(default = "default_session_ttl_days")]
    pub ttl_days: i64,
}

fn default_session_ttl_days() -> i64 {
    7
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: None,
            ttl_days: default_session_ttl_days(),
        }
    }
}

/// OIDC identity-provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfig {
    /// Issuer base URL for discovery. Overridden by SPEAKBRIGHT_ISSUER_URL env.
    pub issuer_url: Option<String>,

    /// OAuth client id. Overridden by SPEAKBRIGHT_CLIENT_ID env.
    pub client_id: Option<String>,

    /// Domains this deployment serves. Overridden by SPEAKBRIGHT_DOMAINS env
    /// (comma-separated).
    #[serde(default)]
    pub domains: Vec<String>,

    /// How long a fetched discovery document stays valid, in seconds
    /// (default 3600).
    #[serde(default = "default_discovery_ttl_secs")]
    pub discovery_ttl_secs: u64,
}

fn default_discovery_ttl_secs() -> u64 {
    3600
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer_url: None,
            client_id: None,
            domains: Vec::new(),
            discovery_ttl_secs: default_discovery_ttl_secs(),
        }
    }
}

/// Support/completion API settings (emotion analysis for chat replies).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportConfig {
    /// OpenAI-compatible base URL (e.g. "https://api.openai.com/v1"). When
    /// absent, chat replies use the built-in supportive fallback.
    pub base_url: Option<String>,

    /// API key. Overridden by SPEAKBRIGHT_SUPPORT_API_KEY env.
    pub api_key: Option<String>,

    /// Model name for the completion request (default "gpt-4o-mini").
    #[serde(default = "default_support_model")]
    pub model: String,
}

fn default_support_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: default_support_model(),
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn config_nonempty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the session secret: env SPEAKBRIGHT_SESSION_SECRET overrides config.
pub fn resolve_session_secret(config: &Config) -> Option<String> {
    env_nonempty("SPEAKBRIGHT_SESSION_SECRET")
        .or_else(|| config_nonempty(config.session.secret.as_ref()))
}

/// Resolve the session database URL: env SPEAKBRIGHT_DATABASE_URL overrides config.
pub fn resolve_database_url(config: &Config) -> Option<String> {
    env_nonempty("SPEAKBRIGHT_DATABASE_URL")
        .or_else(|| config_nonempty(config.database_url.as_ref()))
}

/// Resolve the OIDC issuer URL: env SPEAKBRIGHT_ISSUER_URL overrides config.
pub fn resolve_issuer_url(config: &Config) -> Option<String> {
    env_nonempty("SPEAKBRIGHT_ISSUER_URL")
        .or_else(|| config_nonempty(config.oidc.issuer_url.as_ref()))
}

/// Resolve the OIDC client id: env SPEAKBRIGHT_CLIENT_ID overrides config.
pub fn resolve_client_id(config: &Config) -> Option<String> {
    env_nonempty("SPEAKBRIGHT_CLIENT_ID")
        .or_else(|| config_nonempty(config.oidc.client_id.as_ref()))
}

/// Resolve served domains: env SPEAKBRIGHT_DOMAINS (comma-separated) overrides config.
pub fn resolve_domains(config: &Config) -> Vec<String> {
    match env_nonempty("SPEAKBRIGHT_DOMAINS") {
        Some(s) => s
            .split(',')
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect(),
        None => config.oidc.domains.clone(),
    }
}

/// Resolve the support API key: env SPEAKBRIGHT_SUPPORT_API_KEY overrides config.
pub fn resolve_support_api_key(config: &Config) -> Option<String> {
    env_nonempty("SPEAKBRIGHT_SUPPORT_API_KEY")
        .or_else(|| config_nonempty(config.support.api_key.as_ref()))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SPEAKBRIGHT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".speakbright").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or SPEAKBRIGHT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
