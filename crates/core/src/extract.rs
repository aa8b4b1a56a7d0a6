//! Heuristic text extraction from event payloads.
//!
//! Event payloads have no fixed schema across event codes, so recognized
//! speech and reply text are located by key name anywhere in the tree. The
//! walk is depth-first, objects in key order, and returns the first non-blank
//! string stored under one of the requested keys.

use serde_json::Value;

/// Keys under which recognized user speech is reported.
pub const USER_SPEECH_KEYS: &[&str] = &["asr_text", "user_text", "question", "transcript", "query"];

/// Keys under which assistant reply text is reported.
pub const ASSISTANT_REPLY_KEYS: &[&str] = &["llm_text", "answer", "reply", "content"];

/// Text found in one event payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialogueText {
    pub user: Option<String>,
    pub assistant: Option<String>,
}

impl DialogueText {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.assistant.is_none()
    }
}

/// Returns the first non-blank string stored under any of `keys`.
pub fn find_text<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    match value {
        Value::Object(map) => map.iter().find_map(|(key, child)| match child {
            Value::String(text) if keys.contains(&key.as_str()) && !text.trim().is_empty() => {
                Some(text.as_str())
            }
            _ => find_text(child, keys),
        }),
        Value::Array(items) => items.iter().find_map(|item| find_text(item, keys)),
        _ => None,
    }
}

/// Looks up user speech and assistant reply independently.
pub fn extract_dialogue(payload: &Value) -> DialogueText {
    DialogueText {
        user: find_text(payload, USER_SPEECH_KEYS).map(str::to_owned),
        assistant: find_text(payload, ASSISTANT_REPLY_KEYS).map(str::to_owned),
    }
}
