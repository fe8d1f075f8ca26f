//! Server: REST routes and the real-time WebSocket channel on a single port.
//!
//! Auth-relevant flow: request -> token/session resolver -> auth gate ->
//! route handler -> stores / support API. WebSocket connections authenticate
//! at the handshake or later with an in-band `auth` frame.

mod protocol;
mod server;
mod ws;

pub use protocol::{InboundFrame, OutboundFrame};
pub use server::{run_server, AppState};
