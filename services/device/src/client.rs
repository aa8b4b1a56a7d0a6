//! The reconnecting outer loop.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::audio::{AudioSink, AudioSource, NullSink, PcmFileSink, PcmFileSource, SilenceSource};
use crate::config::DeviceConfig;
use crate::error::DeviceResult;
use crate::pipeline::{SessionParts, run_session};
use crate::queue::PlaybackQueue;
use crate::status::{DeviceStatus, StatusIndicator};
use crate::ws;

pub struct DeviceClient {
    config: DeviceConfig,
    status: Arc<dyn StatusIndicator>,
}

impl DeviceClient {
    pub fn new(config: DeviceConfig, status: Arc<dyn StatusIndicator>) -> Self {
        Self { config, status }
    }

    /// Streams to the relay, reconnecting after a fixed backoff whenever a
    /// session ends, until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            self.status.set(DeviceStatus::Connecting);
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.run_once(attempt) => outcome,
            };
            if let Err(e) = outcome {
                self.status.set(DeviceStatus::Error);
                warn!(
                    error = %e,
                    backoff_secs = self.config.backoff_secs,
                    "Session ended, reconnecting."
                );
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.config.backoff()) => {}
            }
        }
        info!("Device client stopped.");
    }

    #[instrument(name = "session", skip(self))]
    async fn run_once(&self, attempt: u64) -> DeviceResult<()> {
        let (reader, writer) = ws::connect(&self.config.relay_url).await?;
        info!(url = %self.config.relay_url, "Connected to relay.");

        let parts = SessionParts {
            source: self.open_source().await?,
            output: Arc::new(Mutex::new(self.open_sink().await?)),
            queue: Arc::new(PlaybackQueue::new(self.config.queue_capacity)),
            status: self.status.clone(),
        };
        run_session(reader, writer, parts).await
    }

    async fn open_source(&self) -> DeviceResult<Box<dyn AudioSource>> {
        let period = self.config.chunk_interval();
        Ok(match &self.config.input {
            Some(path) => Box::new(PcmFileSource::open(path, self.config.chunk_size, period).await?),
            None => Box::new(SilenceSource::new(self.config.chunk_size, period)),
        })
    }

    async fn open_sink(&self) -> DeviceResult<Box<dyn AudioSink>> {
        Ok(match &self.config.output {
            Some(path) => Box::new(PcmFileSink::open(path).await?),
            None => Box::new(NullSink),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MockStatusIndicator;
    use clap::Parser;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reconnects_after_each_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                while !request.ends_with(b"\r\n\r\n") {
                    request.push(socket.read_u8().await.unwrap());
                }
                socket
                    .write_all(b"HTTP/1.1 101 Switching Protocols\r\n\r\n")
                    .await
                    .unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                // End the session right away.
                socket.write_all(&[0x88, 0]).await.unwrap();
            }
        });

        let config =
            DeviceConfig::try_parse_from(["device", "--relay-url", &url, "--backoff-secs", "0"])
                .unwrap();
        let mut status = MockStatusIndicator::new();
        status.expect_set().return_const(());
        let client = DeviceClient::new(config, Arc::new(status));

        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        let watched = accepted.clone();
        tokio::spawn(async move {
            while watched.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            stopper.cancel();
        });

        tokio::time::timeout(Duration::from_secs(10), client.run(shutdown))
            .await
            .unwrap();
        assert!(accepted.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn connection_refused_is_retried_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        drop(listener);

        let config =
            DeviceConfig::try_parse_from(["device", "--relay-url", &url, "--backoff-secs", "0"])
                .unwrap();
        let mut status = MockStatusIndicator::new();
        status
            .expect_set()
            .withf(|s| matches!(s, DeviceStatus::Connecting | DeviceStatus::Error))
            .return_const(());
        let client = DeviceClient::new(config, Arc::new(status));

        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), client.run(shutdown))
            .await
            .unwrap();
    }
}
