//! A dialogue session running on its own task.
//!
//! The task owns the [`DialogClient`]: it multiplexes audio and text
//! coming from the owner with messages from the service, so writes to the
//! service are serialized without a lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dialog_protocol::{Payload, ServerMessage, event};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Sleep, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::client::{DialogClient, SessionState};
use crate::error::{DialogError, DialogResult};
use crate::turn::{NeverSpeak, ProactiveConfig, ProactivePolicy, TurnAction, TurnTracker};

const COMMAND_BUFFER: usize = 128;

/// Receives what the service sends during a session.
#[async_trait]
pub trait BridgeHandler: Send + Sync + 'static {
    /// Synthesized audio, in arrival order.
    async fn on_audio(&self, audio: Bytes);

    /// Every full response with an event code; the payload is `null` when
    /// the body was empty.
    async fn on_event(&self, event: u32, payload: &Value);

    /// Audio already passed to `on_audio` is stale.
    async fn on_flush(&self) {}
}

pub struct BridgeOptions {
    /// Pause between FinishSession and FinishConnection on stop.
    pub stop_grace: Duration,
    pub proactive: ProactiveConfig,
    pub policy: Box<dyn ProactivePolicy>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_millis(500),
            proactive: ProactiveConfig::default(),
            policy: Box::new(NeverSpeak),
        }
    }
}

enum BridgeCommand {
    Audio(Bytes),
    Text(String),
}

pub struct BridgeSession {
    session_id: String,
    commands: mpsc::Sender<BridgeCommand>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    done: CancellationToken,
    task: Option<JoinHandle<DialogClient>>,
    stop_grace: Duration,
    stopped: bool,
}

impl BridgeSession {
    /// Connects the client and starts receiving on a new task.
    ///
    /// `shutdown` cancels the receive loop from the outside; the session
    /// still has to be stopped to finish it with the service.
    pub async fn start(
        mut client: DialogClient,
        handler: Arc<dyn BridgeHandler>,
        options: BridgeOptions,
        shutdown: &CancellationToken,
    ) -> DialogResult<Self> {
        client.connect().await?;

        let session_id = client.session_id().to_string();
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let running = Arc::new(AtomicBool::new(true));
        let cancel = shutdown.child_token();
        let done = CancellationToken::new();

        let receive_loop = ReceiveLoop {
            client,
            commands: command_rx,
            handler,
            turns: TurnTracker::new(options.policy),
            proactive: options.proactive,
            running: running.clone(),
            cancel: cancel.clone(),
            done: done.clone(),
        };
        let span = info_span!("bridge", session_id = %session_id);
        let task = tokio::spawn(receive_loop.run().instrument(span));

        Ok(Self {
            session_id,
            commands,
            running,
            cancel,
            done,
            task: Some(task),
            stop_grace: options.stop_grace,
            stopped: false,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the receive loop has ended.
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once the receive loop has ended.
    pub async fn finished(&self) {
        self.done.cancelled().await
    }

    /// Forwards user audio. Dropped once the session is no longer running.
    pub async fn send_audio(&self, audio: Bytes) {
        self.forward(BridgeCommand::Audio(audio)).await
    }

    /// Forwards a typed user query. Dropped once the session is no longer
    /// running.
    pub async fn send_text(&self, text: String) {
        self.forward(BridgeCommand::Text(text)).await
    }

    async fn forward(&self, command: BridgeCommand) {
        if !self.is_running() {
            return;
        }
        if self.commands.send(command).await.is_err() {
            debug!(session_id = %self.session_id, "Receive loop gone, dropping input.");
        }
    }

    /// Ends the session with the service and closes the connection.
    ///
    /// Safe to call more than once; only the first call does anything.
    pub async fn stop(&mut self) -> DialogResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let Some(task) = self.task.take() else {
            return Ok(());
        };
        let mut client = task
            .await
            .map_err(|e| DialogError::Transport(format!("bridge task failed: {e}")))?;

        if client.state() == SessionState::SessionActive {
            if let Err(e) = client.finish_session().await {
                warn!(session_id = %self.session_id, error = %e, "FinishSession failed.");
            }
            sleep(self.stop_grace).await;
        }
        if client.state() != SessionState::Closed {
            if let Err(e) = client.finish_connection().await {
                warn!(session_id = %self.session_id, error = %e, "FinishConnection failed.");
            }
        }
        client.close().await?;
        info!(session_id = %self.session_id, "Bridge session stopped.");
        Ok(())
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ReceiveLoop {
    client: DialogClient,
    commands: mpsc::Receiver<BridgeCommand>,
    handler: Arc<dyn BridgeHandler>,
    turns: TurnTracker,
    proactive: ProactiveConfig,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    done: CancellationToken,
}

enum Flow {
    Continue,
    Break,
}

impl ReceiveLoop {
    async fn run(mut self) -> DialogClient {
        let _done = self.done.clone().drop_guard();
        let mut context_timer: Option<std::pin::Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Receive loop cancelled.");
                    break;
                }

                Some(command) = self.commands.recv() => {
                    let result = match command {
                        BridgeCommand::Audio(audio) => self.client.send_audio(&audio).await,
                        BridgeCommand::Text(text) => self.client.chat_text_query(&text).await,
                    };
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to forward input to dialogue service.");
                        if matches!(e, DialogError::TransportClosed | DialogError::Transport(_)) {
                            break;
                        }
                    }
                }

                received = self.client.receive_next() => {
                    match received {
                        Ok(message) => {
                            if let Flow::Break = self.handle(message, &mut context_timer).await {
                                break;
                            }
                        }
                        Err(e) if e.is_recoverable() => {
                            warn!(error = %e, "Dropping malformed message.");
                        }
                        Err(DialogError::TransportClosed) => {
                            info!("Dialogue service closed the connection.");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Dialogue session failed.");
                            break;
                        }
                    }
                }

                _ = async {
                    if let Some(timer) = context_timer.as_mut() {
                        timer.await;
                    }
                }, if context_timer.is_some() => {
                    context_timer = None;
                    if let Some(context) = self.proactive.external_context.as_deref() {
                        let querying = self.turns.user_querying();
                        if let Err(e) = self.client.send_external_context(querying, context).await {
                            warn!(error = %e, "Failed to send external context.");
                        }
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.client
    }

    async fn handle(
        &mut self,
        message: ServerMessage,
        context_timer: &mut Option<std::pin::Pin<Box<Sleep>>>,
    ) -> Flow {
        match message {
            ServerMessage::Ack(frame) => match frame.payload {
                Payload::Binary(audio) if !audio.is_empty() => {
                    if self.turns.suppress_audio() {
                        trace!(len = audio.len(), "Holding back audio before proactive speech.");
                    } else {
                        self.handler.on_audio(audio).await;
                    }
                }
                _ => trace!("Heartbeat."),
            },
            ServerMessage::FullResponse(frame) => {
                let Some(code) = frame.event else {
                    debug!("Full response without event code.");
                    return Flow::Continue;
                };
                // An empty body arrives as `null`.
                let payload = frame.payload.into_json();
                let action = self.turns.observe(code, &payload);

                self.handler.on_event(code, &payload).await;
                match action {
                    Some(TurnAction::Flush) => self.handler.on_flush().await,
                    Some(TurnAction::SpeakProactively) => self.speak_proactively(context_timer).await,
                    None => {}
                }

                if event::is_terminal(code) {
                    info!(event = code, "Dialogue session ended by service.");
                    return Flow::Break;
                }
            }
            ServerMessage::Error(err) => {
                error!(code = err.code, message = %err.message(), "Dialogue service error.");
                return Flow::Break;
            }
            ServerMessage::Unrecognized(header) => {
                debug!(message_type = ?header.message_type, "Ignoring unrecognized message.");
            }
        }
        Flow::Continue
    }

    async fn speak_proactively(&mut self, context_timer: &mut Option<std::pin::Pin<Box<Sleep>>>) {
        let querying = self.turns.user_querying();
        let text = &self.proactive.comfort_text;
        let result = match self.client.send_proactive_text(querying, true, false, text).await {
            Ok(_) => self.client.send_proactive_text(querying, false, true, "").await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to send proactive text.");
            return;
        }
        if self.proactive.external_context.is_some() {
            *context_timer = Some(Box::pin(sleep(self.proactive.context_delay)));
        }
    }
}
