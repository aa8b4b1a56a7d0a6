//! Turn tracking and proactive speech.

use std::time::Duration;

use dialog_protocol::event;
use serde_json::Value;

/// Decides, at the end of each user turn, whether the assistant should
/// fill the silence on its own.
#[cfg_attr(test, mockall::automock)]
pub trait ProactivePolicy: Send {
    fn should_speak(&mut self) -> bool;
}

/// Never speaks proactively.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSpeak;

impl ProactivePolicy for NeverSpeak {
    fn should_speak(&mut self) -> bool {
        false
    }
}

/// Speaks with a fixed probability per finished turn.
#[derive(Debug, Clone, Copy)]
pub struct RandomPolicy {
    probability: f64,
}

impl RandomPolicy {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }
}

impl ProactivePolicy for RandomPolicy {
    fn should_speak(&mut self) -> bool {
        self.probability > 0.0 && rand::random::<f64>() < self.probability
    }
}

/// What a proactive utterance says.
#[derive(Debug, Clone)]
pub struct ProactiveConfig {
    /// Spoken right away as a single start/end text pair.
    pub comfort_text: String,
    /// Injected as external context after `context_delay`, if set.
    pub external_context: Option<String>,
    pub context_delay: Duration,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            comfort_text: "Let me think about that for a moment.".to_string(),
            external_context: None,
            context_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnAction {
    /// Audio already forwarded is stale and should be dropped by the owner.
    Flush,
    /// Start a proactive utterance.
    SpeakProactively,
}

/// TTS sources that mark the start of a proactive utterance.
const PROACTIVE_TTS_TYPES: [&str; 2] = ["chat_tts_text", "external_rag"];

pub struct TurnTracker {
    user_querying: bool,
    proactive_pending: bool,
    policy: Box<dyn ProactivePolicy>,
}

impl TurnTracker {
    pub fn new(policy: Box<dyn ProactivePolicy>) -> Self {
        Self {
            user_querying: false,
            proactive_pending: false,
            policy,
        }
    }

    pub fn user_querying(&self) -> bool {
        self.user_querying
    }

    /// Cloud audio is held back between triggering a proactive utterance
    /// and the moment its speech starts.
    pub fn suppress_audio(&self) -> bool {
        self.proactive_pending
    }

    pub fn observe(&mut self, event: u32, payload: &Value) -> Option<TurnAction> {
        match event {
            event::ASR_INFO => {
                self.user_querying = true;
                Some(TurnAction::Flush)
            }
            event::ASR_ENDED => {
                self.user_querying = false;
                if self.policy.should_speak() {
                    self.proactive_pending = true;
                    Some(TurnAction::SpeakProactively)
                } else {
                    None
                }
            }
            event::TTS_SENTENCE_START if self.proactive_pending => {
                let tts_type = payload.get("tts_type").and_then(Value::as_str);
                if tts_type.is_some_and(|t| PROACTIVE_TTS_TYPES.contains(&t)) {
                    self.proactive_pending = false;
                    Some(TurnAction::Flush)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl Default for TurnTracker {
    fn default() -> Self {
        Self::new(Box::new(NeverSpeak))
    }
}
