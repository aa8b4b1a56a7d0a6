//! The control-message lifecycle of one dialogue session.

use std::fmt;

use dialog_protocol::{ClientRequest, ServerMessage, event, parse_response};
use serde_json::{Value, json};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{DialogError, DialogResult};
use crate::transport::DialogTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    SessionActive,
    SessionFinishing,
    SessionFinished,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::SessionActive => "active",
            SessionState::SessionFinishing => "finishing",
            SessionState::SessionFinished => "finished",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Drives one session over a [`DialogTransport`].
///
/// Requests are written one at a time by whoever owns the client; the
/// handshakes wait for their response before returning.
pub struct DialogClient {
    transport: Box<dyn DialogTransport>,
    session_id: String,
    config: SessionConfig,
    state: SessionState,
}

impl DialogClient {
    pub fn new(
        transport: Box<dyn DialogTransport>,
        session_id: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            session_id: session_id.into(),
            config,
            state: SessionState::Disconnected,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs the StartConnection and StartSession handshakes.
    pub async fn connect(&mut self) -> DialogResult<()> {
        if self.state != SessionState::Disconnected {
            return Err(self.invalid_state("connect"));
        }

        let start_connection = ClientRequest::control(event::START_CONNECTION, None, &json!({}))?;
        self.write(start_connection).await?;
        self.expect_handshake("StartConnection", event::CONNECTION_FAILED)
            .await?;
        self.state = SessionState::Connected;

        let payload = self.config.start_session_payload()?;
        let start_session =
            ClientRequest::control(event::START_SESSION, Some(&self.session_id), &payload)?;
        self.write(start_session).await?;
        self.expect_handshake("StartSession", event::SESSION_FAILED)
            .await?;
        self.state = SessionState::SessionActive;

        info!(session_id = %self.session_id, "Dialogue session started.");
        Ok(())
    }

    async fn expect_handshake(&mut self, step: &'static str, failed_event: u32) -> DialogResult<()> {
        let frame = timeout(self.config.handshake_timeout, self.transport.recv())
            .await
            .map_err(|_| DialogError::Connection(format!("{step} timed out")))?
            .map_err(|e| DialogError::Connection(format!("{step}: {e}")))?;
        let message = parse_response(&frame)
            .map_err(|e| DialogError::Connection(format!("{step}: {e}")))?;

        match message {
            ServerMessage::Error(err) => Err(DialogError::Connection(format!(
                "{step} rejected with code {}: {}",
                err.code,
                err.message()
            ))),
            message if message.event() == Some(failed_event) => Err(DialogError::Connection(
                format!("{step} failed: event {failed_event}"),
            )),
            message => {
                debug!(step, event = ?message.event(), "Handshake acknowledged.");
                Ok(())
            }
        }
    }

    /// Asks the service to speak the configured greeting.
    pub async fn say_hello(&mut self) -> DialogResult<()> {
        let payload = json!({ "content": self.config.greeting });
        self.send_control("say_hello", event::SAY_HELLO, &payload)
            .await
    }

    /// Sends a typed user query.
    pub async fn chat_text_query(&mut self, text: &str) -> DialogResult<()> {
        self.send_control("chat_text_query", event::CHAT_TEXT_QUERY, &json!({ "content": text }))
            .await
    }

    /// Sends one fragment of text for the service to speak.
    ///
    /// Nothing is sent while the user is talking; returns whether the
    /// fragment went out.
    pub async fn send_proactive_text(
        &mut self,
        is_user_querying: bool,
        start: bool,
        end: bool,
        content: &str,
    ) -> DialogResult<bool> {
        if is_user_querying {
            debug!("Skipping proactive text while the user is speaking.");
            return Ok(false);
        }
        let payload = json!({ "start": start, "end": end, "content": content });
        self.send_control("send_proactive_text", event::CHAT_TTS_TEXT, &payload)
            .await?;
        Ok(true)
    }

    /// Injects external context for the next reply. Same rule as
    /// [`send_proactive_text`](Self::send_proactive_text).
    pub async fn send_external_context(
        &mut self,
        is_user_querying: bool,
        context: &str,
    ) -> DialogResult<bool> {
        if is_user_querying {
            debug!("Skipping external context while the user is speaking.");
            return Ok(false);
        }
        let payload = json!({ "external_rag": context });
        self.send_control("send_external_context", event::CHAT_RAG_TEXT, &payload)
            .await?;
        Ok(true)
    }

    /// Sends a chunk of 16-bit mono PCM.
    pub async fn send_audio(&mut self, pcm: &[u8]) -> DialogResult<()> {
        self.require_active("send_audio")?;
        let request = ClientRequest::audio(event::TASK_REQUEST, &self.session_id, pcm)?;
        self.write(request).await
    }

    /// Reads and parses the next server message.
    ///
    /// An error response ends the session and is returned as
    /// [`DialogError::Remote`]; the connection can still be finished and
    /// closed afterwards.
    pub async fn receive_next(&mut self) -> DialogResult<ServerMessage> {
        let frame = self.transport.recv().await?;
        let message = parse_response(&frame)?;

        match &message {
            ServerMessage::Error(err) => {
                self.state = SessionState::SessionFinished;
                return Err(DialogError::Remote {
                    code: err.code,
                    message: err.message(),
                });
            }
            ServerMessage::FullResponse(frame) => {
                if frame.event.is_some_and(event::is_terminal) && self.state != SessionState::Closed
                {
                    self.state = SessionState::SessionFinished;
                }
            }
            _ => {}
        }
        Ok(message)
    }

    pub async fn finish_session(&mut self) -> DialogResult<()> {
        self.send_control("finish_session", event::FINISH_SESSION, &json!({}))
            .await?;
        self.state = SessionState::SessionFinishing;
        Ok(())
    }

    /// Sends FinishConnection and waits for the service to confirm it.
    ///
    /// Messages still in flight for the session are read and dropped.
    pub async fn finish_connection(&mut self) -> DialogResult<()> {
        if matches!(self.state, SessionState::Disconnected | SessionState::Closed) {
            return Err(self.invalid_state("finish_connection"));
        }
        let request = ClientRequest::control(event::FINISH_CONNECTION, None, &json!({}))?;
        self.write(request).await?;

        let deadline = Instant::now() + self.config.handshake_timeout;
        loop {
            let frame = timeout_at(deadline, self.transport.recv())
                .await
                .map_err(|_| DialogError::Timeout("FinishConnection"))??;
            match parse_response(&frame)? {
                ServerMessage::Error(err) => {
                    return Err(DialogError::Remote {
                        code: err.code,
                        message: err.message(),
                    });
                }
                message if message.event() == Some(event::CONNECTION_FINISHED) => break,
                message => debug!(event = ?message.event(), "Dropping message while finishing."),
            }
        }
        self.state = SessionState::SessionFinished;
        info!(session_id = %self.session_id, "Dialogue connection finished.");
        Ok(())
    }

    /// Closes the transport. Calling it again is a no-op.
    pub async fn close(&mut self) -> DialogResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "Failed to close dialogue transport cleanly.");
        }
        Ok(())
    }

    async fn send_control(
        &mut self,
        operation: &'static str,
        event: u32,
        payload: &Value,
    ) -> DialogResult<()> {
        self.require_active(operation)?;
        let request = ClientRequest::control(event, Some(&self.session_id), payload)?;
        self.write(request).await
    }

    async fn write(&mut self, request: ClientRequest) -> DialogResult<()> {
        debug!(event = request.event, len = request.bytes.len(), "Sending request.");
        self.transport.send(request.into_bytes()).await
    }

    fn require_active(&self, operation: &'static str) -> DialogResult<()> {
        if self.state == SessionState::SessionActive {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> DialogError {
        DialogError::InvalidState {
            operation,
            state: self.state,
        }
    }
}
