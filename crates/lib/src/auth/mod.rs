//! Authentication: session store, token/session resolver, auth gate, OIDC.

pub mod gate;
pub mod oidc;
pub mod resolver;
pub mod session;
