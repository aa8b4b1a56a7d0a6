//! Device WebSocket handling
//!
//! - `session`: the axum upgrade handler and the adapter from axum messages
//!   to device frames.
//! - `relay`: the transport-independent relay between one device and one
//!   dialogue session.

pub mod relay;
pub mod session;

pub use relay::{DeviceFrame, DeviceSink, DeviceStream, RelayStats, run_relay};
pub use session::ws_handler;
