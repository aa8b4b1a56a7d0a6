//! Relays one device connection to one dialogue session.
//!
//! Audio flows verbatim in both directions. Text from the device becomes a
//! typed query; events from the service become transcripts and playback
//! stop commands for the device.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dialog_protocol::event;
use dialog_realtime::{
    BridgeHandler, BridgeOptions, BridgeSession, Connector, DialogClient, SessionConfig,
    new_session_id,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voicebridge_core::{DeviceMessage, RelayMessage, TranscriptKind, extract_dialogue};

/// Report device upload volume every this many bytes.
const UPLINK_REPORT_BYTES: u64 = 10 * 1024;
/// Report downlink audio volume every this many bytes.
const DOWNLINK_REPORT_BYTES: u64 = 24_000;

/// One frame on the device connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFrame {
    /// 16-bit mono PCM.
    Binary(Bytes),
    /// A JSON control message.
    Text(String),
    /// The device is going away.
    Close,
}

pub type DeviceStream = Pin<Box<dyn Stream<Item = Result<DeviceFrame>> + Send>>;
pub type DeviceSink = Pin<Box<dyn Sink<DeviceFrame, Error = anyhow::Error> + Send>>;

/// Byte totals of a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_up: u64,
    pub bytes_down: u64,
}

/// Runs the relay until the device disconnects or the dialogue ends.
///
/// Teardown always runs once: the session is stopped and the device
/// connection is closed.
pub async fn run_relay(
    mut device_rx: DeviceStream,
    device_tx: DeviceSink,
    connector: &dyn Connector,
    session_config: SessionConfig,
    options: BridgeOptions,
    shutdown: &CancellationToken,
) -> Result<RelayStats> {
    let link = Arc::new(DeviceLink::new(device_tx));

    let transport = match connector.connect().await {
        Ok(transport) => transport,
        Err(e) => {
            link.close().await;
            return Err(e).context("Failed to connect to dialogue service");
        }
    };
    let client = DialogClient::new(transport, new_session_id(), session_config);
    let mut bridge = match BridgeSession::start(client, link.clone(), options, shutdown).await {
        Ok(bridge) => bridge,
        Err(e) => {
            link.close().await;
            return Err(e).context("Failed to start dialogue session");
        }
    };
    info!(session_id = %bridge.session_id(), "Relay started.");

    let bytes_up = pump_device(&bridge, &mut device_rx).await;

    let stopped = bridge.stop().await;
    link.close().await;

    let stats = RelayStats {
        bytes_up,
        bytes_down: link.bytes_down.load(Ordering::Relaxed),
    };
    info!(
        session_id = %bridge.session_id(),
        bytes_up = stats.bytes_up,
        bytes_down = stats.bytes_down,
        "Relay finished."
    );
    stopped.context("Failed to stop dialogue session")?;
    Ok(stats)
}

/// Forwards device input until either side is done. Returns the uplink
/// byte count.
async fn pump_device(bridge: &BridgeSession, device_rx: &mut DeviceStream) -> u64 {
    let mut bytes_up = 0u64;
    loop {
        tokio::select! {
            _ = bridge.finished() => {
                info!("Dialogue session ended; closing device connection.");
                break;
            }
            frame = device_rx.next() => match frame {
                Some(Ok(DeviceFrame::Binary(audio))) => {
                    let before = bytes_up;
                    bytes_up += audio.len() as u64;
                    if bytes_up / UPLINK_REPORT_BYTES > before / UPLINK_REPORT_BYTES {
                        debug!(bytes_up, "Uplink audio.");
                    }
                    bridge.send_audio(audio).await;
                }
                Some(Ok(DeviceFrame::Text(text))) => match serde_json::from_str::<DeviceMessage>(&text) {
                    Ok(DeviceMessage::Text { content }) => bridge.send_text(content).await,
                    Err(e) => debug!(error = %e, "Ignoring malformed device message."),
                },
                Some(Ok(DeviceFrame::Close)) | None => {
                    info!("Device disconnected.");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Device read failed.");
                    break;
                }
            }
        }
    }
    bytes_up
}

/// The device side of a bridge: what the service says goes here.
struct DeviceLink {
    sink: Mutex<DeviceSink>,
    closed: AtomicBool,
    bytes_down: AtomicU64,
}

impl DeviceLink {
    fn new(sink: DeviceSink) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
            bytes_down: AtomicU64::new(0),
        }
    }

    /// Sends one frame; failures are logged and the frame is dropped.
    async fn send(&self, frame: DeviceFrame) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.sink.lock().await.send(frame).await {
            warn!(error = %e, "Failed to send to device.");
        }
    }

    async fn send_message(&self, message: RelayMessage) {
        match message.to_json() {
            Ok(text) => self.send(DeviceFrame::Text(text)).await,
            Err(e) => warn!(error = %e, "Failed to encode device message."),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "Device connection already gone.");
        }
    }
}

#[async_trait]
impl BridgeHandler for DeviceLink {
    async fn on_audio(&self, audio: Bytes) {
        let len = audio.len() as u64;
        let total = self.bytes_down.fetch_add(len, Ordering::Relaxed) + len;
        if total / DOWNLINK_REPORT_BYTES > (total - len) / DOWNLINK_REPORT_BYTES {
            debug!(bytes_down = total, "Downlink audio.");
        }
        self.send(DeviceFrame::Binary(audio)).await
    }

    async fn on_event(&self, code: u32, payload: &Value) {
        let text = extract_dialogue(payload);
        if let Some(user) = text.user {
            self.send_message(RelayMessage::transcript(TranscriptKind::Asr, user))
                .await;
        }
        if let Some(assistant) = text.assistant {
            self.send_message(RelayMessage::transcript(TranscriptKind::Llm, assistant))
                .await;
        }

        if event::is_interruption(code) {
            info!(event = code, "Barge-in, telling device to stop playback.");
            self.send_message(RelayMessage::stop()).await;
        }
    }

    async fn on_flush(&self) {
        self.send_message(RelayMessage::stop()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use serde_json::json;

    fn link() -> (DeviceLink, mpsc::UnboundedReceiver<DeviceFrame>) {
        let (tx, rx) = mpsc::unbounded();
        let sink: DeviceSink = Box::pin(tx.sink_map_err(anyhow::Error::from));
        (DeviceLink::new(sink), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DeviceFrame>) -> Vec<DeviceFrame> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = rx.try_next() {
            frames.push(frame);
        }
        frames
    }

    fn text(value: Value) -> DeviceFrame {
        DeviceFrame::Text(value.to_string())
    }

    #[tokio::test]
    async fn every_interruption_sends_one_stop() {
        let (link, mut rx) = link();

        link.on_event(event::SESSION_STARTED, &json!({})).await;
        link.on_event(event::VAD_BEGIN, &json!({})).await;
        link.on_event(event::VAD_BEGIN, &json!({})).await;
        link.on_event(event::TTS_ENDED, &json!({})).await;

        let stop = text(json!({"command": "stop"}));
        assert_eq!(drain(&mut rx), vec![stop.clone(), stop.clone(), stop]);
    }

    #[tokio::test]
    async fn transcripts_are_forwarded() {
        let (link, mut rx) = link();

        link.on_event(
            event::ASR_INFO,
            &json!({"results": [{"text": "x", "asr_text": "hello there"}]}),
        )
        .await;
        link.on_event(event::TTS_SENTENCE_START, &json!({"extra": {"content": "hi!"}}))
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![
                text(json!({"type": "asr", "text": "hello there"})),
                text(json!({"type": "llm", "text": "hi!"})),
            ]
        );
    }

    #[tokio::test]
    async fn closed_link_sends_nothing() {
        let (link, mut rx) = link();
        link.on_audio(Bytes::from_static(&[1, 2])).await;
        link.close().await;
        link.close().await;
        link.on_audio(Bytes::from_static(&[3, 4])).await;
        link.on_event(event::VAD_BEGIN, &json!({})).await;

        assert_eq!(drain(&mut rx), vec![DeviceFrame::Binary(Bytes::from_static(&[1, 2]))]);
        assert_eq!(link.bytes_down.load(Ordering::Relaxed), 4);
    }
}
