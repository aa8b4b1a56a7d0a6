//! Types shared by the relay and the device client.
//!
//! - `control`: the JSON text frames exchanged over the device WebSocket.
//! - `extract`: best-effort lookup of recognized speech and assistant replies
//!   inside untyped event payloads.

pub mod control;
pub mod extract;

pub use control::{Command, DeviceMessage, RelayMessage, TranscriptKind};
pub use extract::{DialogueText, extract_dialogue, find_text};
