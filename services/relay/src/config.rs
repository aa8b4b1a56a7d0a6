use std::net::SocketAddr;
use std::time::Duration;

use dialog_realtime::{
    BridgeOptions, ConnectConfig, OutputFormat, ProactiveConfig, RandomPolicy, SessionConfig,
    config::DEFAULT_SPEAKER,
};
use tracing::Level;

pub const DEFAULT_DIALOG_URL: &str = "wss://openspeech.bytedance.com/api/v3/realtime/dialogue";
pub const DEFAULT_RESOURCE_ID: &str = "volc.speech.dialog";
pub const DEFAULT_APP_KEY: &str = "PlgvMymc7f3tQnJ6";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub dialog: ConnectConfig,
    pub speaker: String,
    pub output_format: OutputFormat,
    pub recv_timeout_secs: u64,
    pub bot_name: Option<String>,
    pub system_role: Option<String>,
    pub speaking_style: Option<String>,
    pub proactive_probability: f64,
    pub proactive: ProactiveConfig,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8765".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let dialog = ConnectConfig {
            url: std::env::var("DIALOG_URL").unwrap_or_else(|_| DEFAULT_DIALOG_URL.to_string()),
            app_id: required("DIALOG_APP_ID")?,
            access_key: required("DIALOG_ACCESS_KEY")?,
            resource_id: std::env::var("DIALOG_RESOURCE_ID")
                .unwrap_or_else(|_| DEFAULT_RESOURCE_ID.to_string()),
            app_key: std::env::var("DIALOG_APP_KEY").unwrap_or_else(|_| DEFAULT_APP_KEY.to_string()),
        };

        let speaker = std::env::var("DIALOG_SPEAKER").unwrap_or_else(|_| DEFAULT_SPEAKER.to_string());

        let output_format = std::env::var("DIALOG_OUTPUT_FORMAT")
            .unwrap_or_else(|_| "pcm_s16le".to_string())
            .parse::<OutputFormat>()
            .map_err(|e| ConfigError::InvalidValue("DIALOG_OUTPUT_FORMAT".to_string(), e))?;

        let recv_timeout_str =
            std::env::var("DIALOG_RECV_TIMEOUT").unwrap_or_else(|_| "10".to_string());
        let recv_timeout_secs = recv_timeout_str
            .parse::<u64>()
            .ok()
            .filter(|secs| (10..=120).contains(secs))
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "DIALOG_RECV_TIMEOUT".to_string(),
                    format!("'{}' is not a number of seconds in [10, 120]", recv_timeout_str),
                )
            })?;

        let proactive_str =
            std::env::var("PROACTIVE_PROBABILITY").unwrap_or_else(|_| "0".to_string());
        let proactive_probability = proactive_str
            .parse::<f64>()
            .ok()
            .filter(|p| (0.0..=1.0).contains(p))
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "PROACTIVE_PROBABILITY".to_string(),
                    format!("'{}' is not a probability", proactive_str),
                )
            })?;

        let defaults = ProactiveConfig::default();
        let delay_str = std::env::var("PROACTIVE_CONTEXT_DELAY_SECS")
            .unwrap_or_else(|_| defaults.context_delay.as_secs().to_string());
        let context_delay = delay_str.parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(
                "PROACTIVE_CONTEXT_DELAY_SECS".to_string(),
                format!("'{}' is not a number of seconds", delay_str),
            )
        })?;
        let proactive = ProactiveConfig {
            comfort_text: std::env::var("PROACTIVE_COMFORT_TEXT").unwrap_or(defaults.comfort_text),
            external_context: std::env::var("PROACTIVE_EXTERNAL_CONTEXT").ok(),
            context_delay: Duration::from_secs(context_delay),
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            dialog,
            speaker,
            output_format,
            recv_timeout_secs,
            bot_name: std::env::var("DIALOG_BOT_NAME").ok(),
            system_role: std::env::var("DIALOG_SYSTEM_ROLE").ok(),
            speaking_style: std::env::var("DIALOG_SPEAKING_STYLE").ok(),
            proactive_probability,
            proactive,
            log_level,
        })
    }

    /// Settings for one dialogue session. Every device connection gets its
    /// own copy.
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            speaker: self.speaker.clone(),
            output_format: self.output_format,
            bot_name: self.bot_name.clone().unwrap_or(defaults.bot_name),
            system_role: self.system_role.clone().unwrap_or(defaults.system_role),
            speaking_style: self
                .speaking_style
                .clone()
                .unwrap_or(defaults.speaking_style),
            recv_timeout_secs: self.recv_timeout_secs,
            ..SessionConfig::default()
        }
    }

    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            proactive: self.proactive.clone(),
            policy: Box::new(RandomPolicy::new(self.proactive_probability)),
            ..BridgeOptions::default()
        }
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}
