//! Event codes exchanged with the dialogue service.

// Client -> server.
pub const START_CONNECTION: u32 = 1;
pub const FINISH_CONNECTION: u32 = 2;
pub const START_SESSION: u32 = 100;
pub const FINISH_SESSION: u32 = 102;
pub const TASK_REQUEST: u32 = 200;
pub const SAY_HELLO: u32 = 300;
/// Proactive text for the service to speak.
pub const CHAT_TTS_TEXT: u32 = 500;
pub const CHAT_TEXT_QUERY: u32 = 501;
/// Supplementary context injected into the current turn.
pub const CHAT_RAG_TEXT: u32 = 502;

// Server -> client.
pub const CONNECTION_STARTED: u32 = 50;
pub const CONNECTION_FAILED: u32 = 51;
pub const CONNECTION_FINISHED: u32 = 52;
/// Acknowledges StartSession; also reported as speech onset during a turn.
pub const SESSION_STARTED: u32 = 150;
pub const SESSION_FINISHED: u32 = 152;
pub const SESSION_FAILED: u32 = 153;
pub const TTS_SENTENCE_START: u32 = 350;
pub const TTS_ENDED: u32 = 359;
/// The user started speaking over the assistant.
pub const ASR_INFO: u32 = 450;
/// The user's turn is complete.
pub const ASR_ENDED: u32 = 459;
pub const VAD_BEGIN: u32 = 3001;

/// Events after which the service will not send anything else for the session.
pub const TERMINAL: [u32; 2] = [SESSION_FINISHED, SESSION_FAILED];

/// Events that mean the user is talking and local playback must stop.
pub const INTERRUPTIONS: [u32; 2] = [SESSION_STARTED, VAD_BEGIN];

pub fn is_terminal(event: u32) -> bool {
    TERMINAL.contains(&event)
}

pub fn is_interruption(event: u32) -> bool {
    INTERRUPTIONS.contains(&event)
}
