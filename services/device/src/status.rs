//! Device status reporting.

use std::sync::Mutex;

use tracing::info;
use voicebridge_core::TranscriptKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Connecting,
    Listening,
    Playing,
    Idle,
    Error,
}

/// Where the device shows what it is doing: LEDs, a display, a log.
#[cfg_attr(test, mockall::automock)]
pub trait StatusIndicator: Send + Sync {
    fn set(&self, status: DeviceStatus);
    fn transcript(&self, kind: TranscriptKind, text: &str);
}

/// Reports status changes and transcripts through `tracing`.
#[derive(Debug, Default)]
pub struct LogIndicator {
    last: Mutex<Option<DeviceStatus>>,
}

impl StatusIndicator for LogIndicator {
    fn set(&self, status: DeviceStatus) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if *last != Some(status) {
            info!(?status, "Device status changed.");
            *last = Some(status);
        }
    }

    fn transcript(&self, kind: TranscriptKind, text: &str) {
        match kind {
            TranscriptKind::Asr => info!(%text, "You said."),
            TranscriptKind::Llm => info!(%text, "Assistant said."),
        }
    }
}
