//! Audio endpoints of the device.
//!
//! Capture produces fixed-size chunks of 16-bit mono PCM; playback writes
//! whatever the relay sends. Both are traits so the pipeline runs the same
//! against files, silence or a real codec.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{Interval, MissedTickBehavior, interval};

use crate::error::DeviceResult;

#[async_trait]
pub trait AudioSource: Send {
    /// The next chunk, or `None` when the source is exhausted.
    async fn read_chunk(&mut self) -> DeviceResult<Option<Bytes>>;
}

#[async_trait]
pub trait AudioSink: Send {
    /// Writes one chunk. May block while the device drains.
    async fn write(&mut self, pcm: &[u8]) -> DeviceResult<()>;

    /// Drops anything buffered in the device and starts clean.
    async fn reinit(&mut self) -> DeviceResult<()>;
}

fn pacing(period: Duration) -> Interval {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Zeroed chunks at the real-time rate of a microphone.
pub struct SilenceSource {
    chunk: Bytes,
    ticker: Interval,
}

impl SilenceSource {
    pub fn new(chunk_size: usize, period: Duration) -> Self {
        Self {
            chunk: Bytes::from(vec![0u8; chunk_size]),
            ticker: pacing(period),
        }
    }
}

#[async_trait]
impl AudioSource for SilenceSource {
    async fn read_chunk(&mut self) -> DeviceResult<Option<Bytes>> {
        self.ticker.tick().await;
        Ok(Some(self.chunk.clone()))
    }
}

/// Raw PCM read from a file at the real-time rate.
pub struct PcmFileSource {
    file: File,
    chunk_size: usize,
    ticker: Interval,
}

impl PcmFileSource {
    pub async fn open(path: &Path, chunk_size: usize, period: Duration) -> DeviceResult<Self> {
        Ok(Self {
            file: File::open(path).await?,
            chunk_size,
            ticker: pacing(period),
        })
    }
}

#[async_trait]
impl AudioSource for PcmFileSource {
    async fn read_chunk(&mut self) -> DeviceResult<Option<Bytes>> {
        self.ticker.tick().await;
        let mut chunk = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < chunk.len() {
            let read = self.file.read(&mut chunk[filled..]).await?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        if filled == 0 {
            return Ok(None);
        }
        // A short tail is padded with silence.
        Ok(Some(Bytes::from(chunk)))
    }
}

/// Appends received PCM to a file.
pub struct PcmFileSink {
    path: PathBuf,
    file: File,
}

impl PcmFileSink {
    pub async fn open(path: &Path) -> DeviceResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }
}

#[async_trait]
impl AudioSink for PcmFileSink {
    async fn write(&mut self, pcm: &[u8]) -> DeviceResult<()> {
        self.file.write_all(pcm).await?;
        Ok(())
    }

    async fn reinit(&mut self) -> DeviceResult<()> {
        self.file.flush().await?;
        self.file = OpenOptions::new().append(true).open(&self.path).await?;
        Ok(())
    }
}

/// Discards playback.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn write(&mut self, _pcm: &[u8]) -> DeviceResult<()> {
        Ok(())
    }

    async fn reinit(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}
