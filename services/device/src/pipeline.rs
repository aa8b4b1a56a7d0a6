//! One streaming session with the relay.
//!
//! Three activities run side by side until one of them ends the session:
//! capture sends microphone chunks, receive fills the playback queue and
//! handles control messages, and playback drains the queue into the
//! output device.
//!
//! The output device lock is the only critical section shared by playback
//! (dequeue + write) and stop handling (clear + reinit), so a chunk that
//! was queued before a stop can never be written after it.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, info};
use voicebridge_core::{Command, RelayMessage, TranscriptKind};

use crate::audio::{AudioSink, AudioSource};
use crate::error::{DeviceError, DeviceResult};
use crate::queue::PlaybackQueue;
use crate::status::{DeviceStatus, StatusIndicator};
use crate::ws::{Incoming, SharedWriter, WsReader};

pub type SharedSink = Arc<Mutex<Box<dyn AudioSink>>>;

/// Everything a session needs besides the connection.
pub struct SessionParts {
    pub source: Box<dyn AudioSource>,
    pub output: SharedSink,
    pub queue: Arc<PlaybackQueue>,
    pub status: Arc<dyn StatusIndicator>,
}

/// Runs until the connection ends or an audio endpoint fails.
///
/// Always returns an error: a session has no successful end.
pub async fn run_session<R, W>(
    mut reader: WsReader<R, W>,
    writer: SharedWriter<W>,
    parts: SessionParts,
) -> DeviceResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let SessionParts {
        mut source,
        output,
        queue,
        status,
    } = parts;
    status.set(DeviceStatus::Listening);

    let result = tokio::select! {
        result = capture(source.as_mut(), &writer, status.as_ref()) => result,
        result = receive(&mut reader, &queue, &output, status.as_ref()) => result,
        result = playback(&queue, &output, status.as_ref()) => result,
    };

    let discarded = queue.clear();
    if let Err(e) = writer.lock().await.close().await {
        debug!(error = %e, "Connection already gone.");
    }
    info!(discarded, dropped = queue.dropped(), "Session torn down.");
    result
}

async fn capture<W>(
    source: &mut dyn AudioSource,
    writer: &SharedWriter<W>,
    status: &dyn StatusIndicator,
) -> DeviceResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = source.read_chunk().await? {
        writer.lock().await.send_binary(&chunk).await?;
    }
    info!("Audio input exhausted.");
    status.set(DeviceStatus::Idle);
    std::future::pending().await
}

async fn receive<R, W>(
    reader: &mut WsReader<R, W>,
    queue: &PlaybackQueue,
    output: &SharedSink,
    status: &dyn StatusIndicator,
) -> DeviceResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(message) = reader.next().await {
        match message {
            Incoming::Binary(pcm) => queue.push(pcm),
            Incoming::Text(text) => match parse_control(&text) {
                Control::Stop => stop_playback(queue, output, status).await?,
                Control::Transcript(kind, text) => status.transcript(kind, &text),
                Control::Ignored => debug!(%text, "Ignoring control message."),
            },
        }
    }
    Err(DeviceError::Closed)
}

async fn playback(
    queue: &PlaybackQueue,
    output: &SharedSink,
    status: &dyn StatusIndicator,
) -> DeviceResult<()> {
    let mut playing = false;
    loop {
        {
            let mut sink = output.lock().await;
            if let Some(chunk) = queue.pop() {
                if !playing {
                    status.set(DeviceStatus::Playing);
                    playing = true;
                }
                sink.write(&chunk).await?;
                drop(sink);
                tokio::task::yield_now().await;
                continue;
            }
        }
        if playing {
            status.set(DeviceStatus::Listening);
            playing = false;
        }
        queue.ready().await;
    }
}

async fn stop_playback(
    queue: &PlaybackQueue,
    output: &SharedSink,
    status: &dyn StatusIndicator,
) -> DeviceResult<()> {
    let mut sink = output.lock().await;
    let discarded = queue.clear();
    sink.reinit().await?;
    drop(sink);
    info!(discarded, "Playback stopped by relay.");
    status.set(DeviceStatus::Listening);
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Control {
    Stop,
    Transcript(TranscriptKind, String),
    Ignored,
}

fn parse_control(text: &str) -> Control {
    match serde_json::from_str::<RelayMessage>(text) {
        Ok(RelayMessage::Command {
            command: Command::Stop,
        }) => Control::Stop,
        Ok(RelayMessage::Transcript { kind, text }) => Control::Transcript(kind, text),
        // Older relays send a bare word.
        Err(_) if text.contains("stop") => Control::Stop,
        Err(_) => Control::Ignored,
    }
}
