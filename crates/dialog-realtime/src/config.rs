//! Per-session configuration and the StartSession payload it produces.

use std::time::Duration;

use dialog_protocol::ProtocolError;
use serde::Serialize;
use serde_json::Value;

use crate::error::DialogResult;

pub const DEFAULT_SPEAKER: &str = "zh_female_xiaohe_jupiter_bigtts";
pub const MIN_RECV_TIMEOUT_SECS: u64 = 10;
pub const MAX_RECV_TIMEOUT_SECS: u64 = 120;

/// Encoding of synthesized audio sent back by the service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum OutputFormat {
    /// 32-bit float PCM.
    #[serde(rename = "pcm")]
    Pcm,
    /// 16-bit signed little-endian PCM, what the device plays.
    #[default]
    #[serde(rename = "pcm_s16le")]
    PcmS16le,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pcm" => Ok(OutputFormat::Pcm),
            "pcm_s16le" => Ok(OutputFormat::PcmS16le),
            other => Err(format!("unknown output format '{other}'")),
        }
    }
}

/// How user input reaches the service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    #[default]
    Audio,
    Text,
    AudioFile,
}

/// Immutable settings for one dialogue session.
///
/// Built once per session and handed to the client; nothing mutates it
/// afterwards.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub speaker: String,
    pub output_format: OutputFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub bot_name: String,
    pub system_role: String,
    pub speaking_style: String,
    pub character_manifest: Option<String>,
    pub city: Option<String>,
    pub strict_audit: bool,
    pub audit_response: String,
    pub model: String,
    pub input_mode: InputMode,
    pub end_smooth_window_ms: u32,
    /// Seconds of silence before the service ends the session. Sent
    /// clamped to `MIN_RECV_TIMEOUT_SECS..=MAX_RECV_TIMEOUT_SECS`.
    pub recv_timeout_secs: u64,
    /// Spoken by `say_hello`.
    pub greeting: String,
    /// Upper bound on each handshake or finish response.
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            speaker: DEFAULT_SPEAKER.to_string(),
            output_format: OutputFormat::default(),
            sample_rate: 24_000,
            channels: 1,
            bot_name: "Doubao".to_string(),
            system_role: "You are a friendly voice assistant.".to_string(),
            speaking_style: "Warm and concise.".to_string(),
            character_manifest: None,
            city: None,
            strict_audit: false,
            audit_response: "Sorry, I can't talk about that.".to_string(),
            model: "O".to_string(),
            input_mode: InputMode::default(),
            end_smooth_window_ms: 1500,
            recv_timeout_secs: MIN_RECV_TIMEOUT_SECS,
            greeting: "Hello, how can I help you?".to_string(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Sets how long the service waits for input before ending the
    /// session, clamped to the range it accepts.
    pub fn with_recv_timeout(mut self, secs: u64) -> Self {
        self.recv_timeout_secs = secs.clamp(MIN_RECV_TIMEOUT_SECS, MAX_RECV_TIMEOUT_SECS);
        self
    }

    /// The receive timeout as the service will see it.
    pub fn recv_timeout_secs(&self) -> u64 {
        self.recv_timeout_secs
            .clamp(MIN_RECV_TIMEOUT_SECS, MAX_RECV_TIMEOUT_SECS)
    }

    /// The JSON body of the StartSession request.
    pub fn start_session_payload(&self) -> DialogResult<Value> {
        let request = wire::StartSession {
            asr: wire::Asr {
                extra: wire::AsrExtra {
                    end_smooth_window_ms: self.end_smooth_window_ms,
                },
            },
            tts: wire::Tts {
                speaker: &self.speaker,
                audio_config: wire::AudioConfig {
                    channel: self.channels,
                    format: self.output_format,
                    sample_rate: self.sample_rate,
                },
            },
            dialog: wire::Dialog {
                bot_name: &self.bot_name,
                system_role: &self.system_role,
                speaking_style: &self.speaking_style,
                character_manifest: self.character_manifest.as_deref(),
                location: self.city.as_deref().map(|city| wire::Location { city }),
                extra: wire::DialogExtra {
                    strict_audit: self.strict_audit,
                    audit_response: &self.audit_response,
                    input_mod: self.input_mode,
                    model: &self.model,
                    recv_timeout: self.recv_timeout_secs(),
                },
            },
        };
        Ok(serde_json::to_value(request).map_err(ProtocolError::from)?)
    }
}

mod wire {
    use serde::Serialize;

    use super::{InputMode, OutputFormat};

    #[derive(Serialize)]
    pub struct StartSession<'a> {
        pub asr: Asr,
        pub tts: Tts<'a>,
        pub dialog: Dialog<'a>,
    }

    #[derive(Serialize)]
    pub struct Asr {
        pub extra: AsrExtra,
    }

    #[derive(Serialize)]
    pub struct AsrExtra {
        pub end_smooth_window_ms: u32,
    }

    #[derive(Serialize)]
    pub struct Tts<'a> {
        pub speaker: &'a str,
        pub audio_config: AudioConfig,
    }

    #[derive(Serialize)]
    pub struct AudioConfig {
        pub channel: u16,
        pub format: OutputFormat,
        pub sample_rate: u32,
    }

    #[derive(Serialize)]
    pub struct Dialog<'a> {
        pub bot_name: &'a str,
        pub system_role: &'a str,
        pub speaking_style: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub character_manifest: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub location: Option<Location<'a>>,
        pub extra: DialogExtra<'a>,
    }

    #[derive(Serialize)]
    pub struct Location<'a> {
        pub city: &'a str,
    }

    #[derive(Serialize)]
    pub struct DialogExtra<'a> {
        pub strict_audit: bool,
        pub audit_response: &'a str,
        pub input_mod: InputMode,
        pub model: &'a str,
        pub recv_timeout: u64,
    }
}
