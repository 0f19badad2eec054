//! The session connection manager.
//!
//! Orchestrates the token client, the room backend, the track lifecycle,
//! the speech capture loop, and the transcript into one state machine with
//! the UI-facing operations: connect, disconnect, send text, toggle the
//! microphone, and start/stop listening.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::errors::SessionError;
use crate::protocol::{self, DataMessage};
use crate::speech::{EngineHandle, RecognitionEvent, SpeechCapture};
use crate::token::{CredentialProvider, Credentials};
use crate::transcript::{TranscriptEntry, TranscriptLog};

use super::backend::{ConnectError, RoomBackend, RoomEvent, RoomSession};
use super::events::{self, SessionSlot};
use super::state::{SessionState, SessionStatus, SharedState};
use super::tracks::TrackLifecycle;

/// Live session connection manager.
///
/// Owns the connection state machine and every media/data resource of the
/// session. All operations are non-fatal: after any failure the manager
/// remains usable for a fresh `connect()`.
pub struct SessionManager {
    config: ClientConfig,
    credentials: Arc<dyn CredentialProvider>,
    backend: Arc<dyn RoomBackend>,
    shared: Arc<SharedState>,
    tracks: Arc<TrackLifecycle>,
    transcript: TranscriptLog,
    speech: SpeechCapture,
    session: SessionSlot,
    event_task: Mutex<Option<JoinHandle<()>>>,
    outbound: mpsc::UnboundedSender<String>,
    outbound_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Build a manager without speech support; `start_listening()` will
    /// report `SpeechUnsupported`.
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        backend: Arc<dyn RoomBackend>,
    ) -> Self {
        Self::build(config, credentials, backend, None)
    }

    /// Build a manager wired to a platform recognition engine.
    pub fn with_recognition(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        backend: Arc<dyn RoomBackend>,
        engine: EngineHandle,
        engine_events: mpsc::UnboundedReceiver<RecognitionEvent>,
    ) -> Self {
        Self::build(config, credentials, backend, Some((engine, engine_events)))
    }

    fn build(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        backend: Arc<dyn RoomBackend>,
        engine: Option<(EngineHandle, mpsc::UnboundedReceiver<RecognitionEvent>)>,
    ) -> Self {
        let shared = Arc::new(SharedState::new(config.force_relay));
        let transcript = TranscriptLog::new();
        let session: SessionSlot = Arc::new(tokio::sync::Mutex::new(None));

        // Finalized utterances and typed messages share one outbound path:
        // append locally, then queue the user_text for the publish worker.
        // A single worker drains the queue so payloads reach the transport
        // in transcript order even when utterances finalize back to back.
        let (outbound, outbound_rx) = mpsc::unbounded_channel::<String>();
        let outbound_task = spawn_outbound_worker(outbound_rx, Arc::clone(&session));

        let on_utterance = {
            let shared = Arc::clone(&shared);
            let transcript = transcript.clone();
            let outbound = outbound.clone();
            let label = config.local_speaker_label.clone();
            Arc::new(move |text: String| {
                transcript.append(label.clone(), text.clone());
                if shared.state() != SessionState::Connected {
                    debug!("Utterance captured while disconnected; transcript only");
                    return;
                }
                if outbound.send(text).is_err() {
                    warn!("Outbound worker gone; dropping utterance");
                }
            })
        };

        let on_recognition_error = {
            let shared = Arc::clone(&shared);
            Arc::new(move |message: String| {
                shared.set_error(message);
            })
        };

        let speech = SpeechCapture::new(
            engine,
            config.restart_delay,
            on_utterance,
            on_recognition_error,
        );

        Self {
            config,
            credentials,
            backend,
            shared,
            tracks: Arc::new(TrackLifecycle::new()),
            transcript,
            speech,
            session,
            event_task: Mutex::new(None),
            outbound,
            outbound_task: Mutex::new(Some(outbound_task)),
        }
    }

    /// Connect to the room.
    ///
    /// No-op while a connect is already in flight or the session is
    /// connected. On failure the state moves to `Error` with a readable
    /// message and the manager stays usable.
    pub async fn connect(&self) -> Result<(), SessionError> {
        if !self.shared.begin_connect() {
            debug!("Connect ignored; state is {:?}", self.shared.state());
            return Ok(());
        }

        match self.run_connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.set_error(e.to_string());
                self.shared.set_state(SessionState::Error);
                Err(e)
            }
        }
    }

    async fn run_connect(&self) -> Result<(), SessionError> {
        // The backend may designate a different room; failure to ask is
        // non-fatal and keeps the configured default.
        let room = self
            .credentials
            .room_override()
            .await
            .unwrap_or_else(|| self.config.room_name.clone());
        let identity = format!("web-{}", Uuid::new_v4());
        info!("Connecting to room {room} as {identity}");

        let credentials = self
            .credentials
            .fetch(&room, &identity, &self.config.display_name)
            .await?;

        let (session, room_events) =
            match self.dial(&credentials, self.shared.relay_forced()).await {
                Ok(pair) => pair,
                Err(SessionError::TransportNegotiationFailed(message))
                    if !self.shared.relay_forced() =>
                {
                    // Exactly one escalation: force relay routing and retry
                    // once. Any further failure surfaces as-is.
                    warn!(
                        "Transport negotiation failed ({message}); retrying once through a TURN relay"
                    );
                    self.shared.force_relay();
                    self.dial(&credentials, true).await?
                }
                Err(e) => return Err(e),
            };

        self.adopt(session, room_events).await;
        self.shared.set_state(SessionState::Connected);
        info!("Connected to room {room}");

        // Apply a mic-sharing intent recorded before/between connects.
        if self.shared.mic_sharing() {
            let session = self.session.lock().await.clone();
            if let Some(session) = session {
                if let Err(e) = self.tracks.enable_publish(session.as_ref()).await {
                    self.shared.set_mic_sharing(false);
                    self.shared.set_error(e.to_string());
                    warn!("Microphone publish failed after connect: {e}");
                }
            }
        }

        Ok(())
    }

    async fn dial(
        &self,
        credentials: &Credentials,
        force_relay: bool,
    ) -> Result<(Box<dyn RoomSession>, mpsc::UnboundedReceiver<RoomEvent>), SessionError> {
        // Losing the race drops the dial future, which cancels it, so an
        // abandoned attempt can never hand over a session the manager has
        // already moved past.
        let attempt = tokio::time::timeout(
            self.config.connect_timeout,
            self.backend
                .connect(&credentials.url, &credentials.token, force_relay),
        );

        match attempt.await {
            Err(_) => Err(SessionError::ConnectTimeout),
            Ok(Ok(pair)) => Ok(pair),
            Ok(Err(ConnectError::TransportNegotiation(message))) => {
                Err(SessionError::TransportNegotiationFailed(message))
            }
            Ok(Err(ConnectError::Rejected(message))) => Err(SessionError::Internal(format!(
                "connection rejected: {message}"
            ))),
            Ok(Err(ConnectError::Other(message))) => Err(SessionError::Internal(message)),
        }
    }

    async fn adopt(
        &self,
        session: Box<dyn RoomSession>,
        room_events: mpsc::UnboundedReceiver<RoomEvent>,
    ) {
        let session: Arc<dyn RoomSession> = Arc::from(session);
        *self.session.lock().await = Some(session);

        let handle = events::spawn_event_loop(
            room_events,
            Arc::clone(&self.shared),
            Arc::clone(&self.tracks),
            self.transcript.clone(),
            Arc::clone(&self.session),
        );

        // Handlers from a previous session must not outlive it.
        let previous = self
            .event_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Disconnect from the room. Idempotent; valid in every state.
    pub async fn disconnect(&self) {
        self.speech.stop();

        let session = self.session.lock().await.take();

        // Device release first, session close second: the microphone must
        // be returned even if the close stalls, and even on a redundant
        // disconnect, in case a publish resolved after a racing teardown.
        self.tracks.disable_publish(session.as_deref()).await;
        self.tracks.detach_all();

        if session.is_none() && self.shared.state() == SessionState::Disconnected {
            return;
        }

        if let Some(session) = &session {
            session.close().await;
        }

        let task = self
            .event_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }

        self.shared.set_state(SessionState::Disconnected);
        info!("Disconnected from room");
    }

    /// Send a text message to the agents over the reliable data channel.
    ///
    /// Silently dropped (not queued) when the session is not connected;
    /// the UI is expected to disable the control in that case.
    pub async fn send_text(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.shared.state() != SessionState::Connected {
            debug!("Dropping outbound text; not connected");
            return;
        }
        if self.session.lock().await.is_none() {
            return;
        }

        self.transcript
            .append(self.config.local_speaker_label.clone(), text);
        if self.outbound.send(text.to_string()).is_err() {
            warn!("Outbound worker gone; dropping text");
        }
    }

    /// Toggle publishing of the local microphone.
    ///
    /// A permission failure reverts the sharing intent and records the
    /// error without tearing down the session.
    pub async fn set_mic_publishing(&self, enabled: bool) -> Result<(), SessionError> {
        self.shared.set_mic_sharing(enabled);

        let session = self.session.lock().await.clone();
        if !enabled {
            self.tracks.disable_publish(session.as_deref()).await;
            return Ok(());
        }

        // No session yet: the intent is applied on the next connect.
        let Some(session) = session else {
            return Ok(());
        };

        match self.tracks.enable_publish(session.as_ref()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.set_mic_sharing(false);
                self.shared.set_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Start the continuous speech capture loop.
    pub fn start_listening(&self) -> Result<(), SessionError> {
        self.speech.start().inspect_err(|e| {
            self.shared.set_error(e.to_string());
        })
    }

    /// Stop the speech capture loop and suppress auto-restart.
    pub fn stop_listening(&self) {
        self.speech.stop();
    }

    /// Disconnect and release the recognition engine. Called when the
    /// owning UI session ends for good.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.speech.teardown();

        let task = self
            .outbound_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    // Observable state for the presentation layer.

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    pub fn error_message(&self) -> Option<String> {
        self.shared.error()
    }

    pub fn relay_forced(&self) -> bool {
        self.shared.relay_forced()
    }

    pub fn mic_sharing(&self) -> bool {
        self.shared.mic_sharing()
    }

    pub fn is_listening(&self) -> bool {
        self.speech.is_listening()
    }

    /// Snapshot of the transcript in arrival order.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.snapshot()
    }

    /// Shared handle to the transcript log for reactive consumers.
    pub fn transcript_log(&self) -> TranscriptLog {
        self.transcript.clone()
    }

    /// Whether a microphone track is currently published.
    pub async fn mic_published(&self) -> bool {
        self.tracks.mic_published().await
    }
}

/// Drains queued outbound texts one at a time, preserving queue order on
/// the wire. Texts queued with no live session are dropped, not held.
fn spawn_outbound_worker(
    mut texts: mpsc::UnboundedReceiver<String>,
    session: SessionSlot,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(text) = texts.recv().await {
            let handle = session.lock().await.clone();
            let Some(handle) = handle else {
                debug!("Dropping queued text; session is gone");
                continue;
            };
            match protocol::encode(&DataMessage::user_text(text.as_str())) {
                Ok(payload) => {
                    if let Err(e) = handle.publish_data(payload).await {
                        warn!("Failed to send text over data channel: {e}");
                    }
                }
                Err(e) => warn!("Failed to encode outbound text: {e}"),
            }
        }
        debug!("Outbound publish worker finished");
    })
}
