//! Voicebridge relay library crate.
//!
//! Accepts device WebSocket connections and bridges each one to its own
//! dialogue session. The `relay` binary is a thin wrapper around this
//! library.

pub mod config;
pub mod router;
pub mod state;
pub mod ws;
