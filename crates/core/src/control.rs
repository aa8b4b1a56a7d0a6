//! Text frames on the device-facing WebSocket.
//!
//! Binary frames carry raw 16-bit mono PCM in both directions and are not
//! modelled here.

use serde::{Deserialize, Serialize};

/// Text frames sent by the device to the relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// A typed query to forward to the dialogue as if it were spoken.
    Text { content: String },
}

/// A playback command for the device.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Drop everything queued for playback.
    Stop,
}

/// Which side of the conversation a transcript belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptKind {
    /// Recognized user speech.
    Asr,
    /// Assistant reply text.
    Llm,
}

/// Text frames sent by the relay to the device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum RelayMessage {
    Command {
        command: Command,
    },
    Transcript {
        #[serde(rename = "type")]
        kind: TranscriptKind,
        text: String,
    },
}

impl RelayMessage {
    pub fn stop() -> Self {
        RelayMessage::Command {
            command: Command::Stop,
        }
    }

    pub fn transcript(kind: TranscriptKind, text: impl Into<String>) -> Self {
        RelayMessage::Transcript {
            kind,
            text: text.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
