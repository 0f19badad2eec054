//! Room event handling for the session manager.
//!
//! A spawned task consumes the backend's event stream and forwards track,
//! data, and connection-state updates into the owning session's state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::SessionError;
use crate::protocol::{self, DataMessage};
use crate::transcript::TranscriptLog;

use super::backend::{ConnectionState, RoomEvent, RoomSession};
use super::state::{SessionState, SharedState};
use super::tracks::TrackLifecycle;

pub(super) type SessionSlot = Arc<tokio::sync::Mutex<Option<Arc<dyn RoomSession>>>>;

pub(super) fn spawn_event_loop(
    mut events: mpsc::UnboundedReceiver<RoomEvent>,
    shared: Arc<SharedState>,
    tracks: Arc<TrackLifecycle>,
    transcript: TranscriptLog,
    session: SessionSlot,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RoomEvent::TrackSubscribed { track } => {
                    let handle = session.lock().await.clone();
                    if let Some(handle) = handle {
                        tracks.attach_remote(handle.as_ref(), &track);
                    }
                }
                RoomEvent::TrackUnsubscribed { track } => {
                    tracks.detach_remote(&track);
                }
                RoomEvent::DataReceived { payload } => {
                    // Undecodable payloads and unknown types were already
                    // dropped by the protocol layer; inbound user_text
                    // echoes are not transcript material either.
                    if let Some(DataMessage::AgentText { speaker, text }) =
                        protocol::decode(&payload)
                    {
                        transcript.append(speaker, text);
                    }
                }
                RoomEvent::StateChanged(state) => match state {
                    ConnectionState::Reconnecting => {
                        // The library's own transient reconnection; the
                        // relay fallback policy does not re-run here.
                        info!("Room transport reconnecting");
                        shared.set_state(SessionState::Connecting);
                    }
                    ConnectionState::Connected => {
                        shared.set_state(SessionState::Connected);
                    }
                    ConnectionState::Disconnected => {
                        shared.set_state(SessionState::Disconnected);
                    }
                },
                RoomEvent::Disconnected { reason } => {
                    warn!("Room disconnected: {reason:?}");
                    // Not an Error transition: the session did reach
                    // Connected, so the reason surfaces as a message only.
                    shared.set_state(SessionState::Disconnected);
                    if let Some(reason) = reason {
                        shared.set_error(SessionError::Disconnected(reason).to_string());
                    }

                    // Teardown guarantees: the microphone is released and
                    // no remote sinks survive, even though the room's own
                    // disconnect already happened.
                    let handle = session.lock().await.take();
                    tracks.disable_publish(handle.as_deref()).await;
                    tracks.detach_all();
                    break;
                }
            }
        }
        debug!("Room event loop finished");
    })
}
