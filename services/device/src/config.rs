use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Streams microphone audio to a voicebridge relay and plays back replies.
#[derive(Debug, Clone, Parser)]
#[command(name = "voicebridge-device", version, about)]
pub struct DeviceConfig {
    /// Relay WebSocket URL
    #[arg(long, env = "RELAY_URL", value_name = "WS_URL", default_value = "ws://127.0.0.1:8765/")]
    pub relay_url: String,
    /// Bytes per captured chunk
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 1024)]
    pub chunk_size: usize,
    /// Playback chunks buffered before the oldest is dropped
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 40)]
    pub queue_capacity: usize,
    /// Seconds to wait before reconnecting
    #[arg(long, env = "BACKOFF_SECS", default_value_t = 3)]
    pub backoff_secs: u64,
    /// Raw 16-bit mono PCM to stream instead of silence
    #[arg(long, env = "INPUT_PCM", value_name = "FILE")]
    pub input: Option<PathBuf>,
    /// Where to append received PCM; discarded when omitted
    #[arg(long, env = "OUTPUT_PCM", value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// Sample rate used to pace captured input
    #[arg(long, env = "INPUT_SAMPLE_RATE", default_value_t = 16_000)]
    pub input_sample_rate: u32,
    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: tracing::Level,
}

impl DeviceConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    /// Real-time duration of one captured chunk of 16-bit mono samples.
    pub fn chunk_interval(&self) -> Duration {
        let samples = (self.chunk_size / 2) as u64;
        Duration::from_micros(samples * 1_000_000 / u64::from(self.input_sample_rate.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DeviceConfig::try_parse_from(["device"]).unwrap();
        assert_eq!(config.relay_url, "ws://127.0.0.1:8765/");
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.queue_capacity, 40);
        assert_eq!(config.backoff(), Duration::from_secs(3));
        assert_eq!(config.input, None);
        assert_eq!(config.chunk_interval(), Duration::from_millis(32));
    }

    #[test]
    fn flags_override_defaults() {
        let config = DeviceConfig::try_parse_from([
            "device",
            "--relay-url",
            "ws://10.0.0.2:9000/ws",
            "--chunk-size",
            "640",
            "--input",
            "mic.pcm",
            "--backoff-secs",
            "1",
        ])
        .unwrap();
        assert_eq!(config.relay_url, "ws://10.0.0.2:9000/ws");
        assert_eq!(config.chunk_interval(), Duration::from_millis(20));
        assert_eq!(config.input, Some(PathBuf::from("mic.pcm")));
        assert_eq!(config.backoff(), Duration::from_secs(1));
    }
}
