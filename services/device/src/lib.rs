//! Voicebridge device client.
//!
//! Streams captured audio to the relay over a minimal WebSocket client and
//! plays back what comes in, reconnecting forever.

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod status;
pub mod ws;

pub use client::DeviceClient;
pub use config::DeviceConfig;
pub use error::{DeviceError, DeviceResult};
