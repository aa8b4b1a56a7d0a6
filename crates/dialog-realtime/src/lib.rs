//! Realtime dialogue client.
//!
//! - `transport`: the byte-frame connection to the service and its
//!   WebSocket implementation.
//! - `client`: the control-message lifecycle of one dialogue session.
//! - `bridge`: a session driven on its own task, decoupled from whatever
//!   carries audio to and from the user.
//! - `turn`: turn tracking and proactive speech triggering.

pub mod bridge;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod transport;
pub mod turn;

pub use bridge::{BridgeHandler, BridgeOptions, BridgeSession};
pub use channel::{ChannelPeer, ChannelTransport, channel_transport};
pub use client::{DialogClient, SessionState};
pub use config::{InputMode, OutputFormat, SessionConfig};
pub use error::{DialogError, DialogResult};
pub use transport::{ConnectConfig, Connector, DialogTransport, WsConnector, WsTransport};
pub use turn::{NeverSpeak, ProactiveConfig, ProactivePolicy, RandomPolicy, TurnAction, TurnTracker};

/// Generates a fresh client-side session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
