//! SpeakBright core library — configuration, stores, authentication, the
//! support client, and the HTTP + WebSocket server used by the CLI.

pub mod auth;
pub mod config;
pub mod init;
pub mod server;
pub mod store;
pub mod support;
