//! The transport seam between the session manager and a real room SDK.
//!
//! The manager owns connection policy (timeout, relay fallback, state
//! transitions) and consumes a structured error classification from the
//! backend, so the retry rules never depend on matching error message text.

use tokio::sync::mpsc;

use crate::errors::SessionError;

/// Kind of a remote track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Other,
}

/// Identity of a remote track as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub sid: String,
    pub kind: TrackKind,
}

impl RemoteTrackInfo {
    pub fn audio(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            kind: TrackKind::Audio,
        }
    }
}

/// Transport-level connection state reported by the room library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// The library's own transient reconnection; not a fresh attempt.
    Reconnecting,
    Disconnected,
}

/// Events delivered by a connected room session.
#[derive(Debug)]
pub enum RoomEvent {
    TrackSubscribed { track: RemoteTrackInfo },
    TrackUnsubscribed { track: RemoteTrackInfo },
    DataReceived { payload: Vec<u8> },
    StateChanged(ConnectionState),
    Disconnected { reason: Option<String> },
}

/// Why a connect attempt failed, classified by the backend.
///
/// Only [`ConnectError::TransportNegotiation`] triggers the relay fallback;
/// credential rejections and everything else surface immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectError {
    /// The underlying peer connection could not be established.
    #[error("transport negotiation failed: {0}")]
    TransportNegotiation(String),

    /// The server refused the join (bad token, unknown room, ...).
    #[error("connection rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

/// Raised when a sink's playback is blocked by the platform autoplay policy.
#[derive(Debug, Clone, thiserror::Error)]
#[error("playback blocked by the platform autoplay policy")]
pub struct PlaybackBlocked;

/// A playable media sink attached to one remote audio track.
pub trait AudioSink: Send {
    /// Begin (or resume) playback.
    fn play(&mut self) -> Result<(), PlaybackBlocked>;

    /// Detach from the track and release the sink's resources.
    fn detach(&mut self);
}

/// Failure publishing the local microphone.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MicPublishError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Other(String),
}

/// The local microphone track. Dropping it alone does not release the
/// device; callers must invoke [`stop`](Self::stop).
pub trait LocalMicTrack: Send + Sync {
    /// Stop capture and release the device.
    fn stop(&self);
}

/// A live, connected room session.
#[async_trait::async_trait]
pub trait RoomSession: Send + Sync {
    /// Create a playable sink for a subscribed audio track, already marked
    /// for autoplay and inline playback. Returns `None` when the track is
    /// no longer subscribed.
    fn attach_audio_sink(&self, track: &RemoteTrackInfo) -> Option<Box<dyn AudioSink>>;

    /// Publish bytes on the reliable (ordered, retransmitted) data channel.
    async fn publish_data(&self, payload: Vec<u8>) -> Result<(), SessionError>;

    /// Create and publish the local microphone track.
    async fn publish_microphone(&self) -> Result<Box<dyn LocalMicTrack>, MicPublishError>;

    /// Unpublish the local microphone track, if one is published.
    async fn unpublish_microphone(&self) -> Result<(), SessionError>;

    /// Close the session. Idempotent.
    async fn close(&self);
}

/// Factory for room sessions.
#[async_trait::async_trait]
pub trait RoomBackend: Send + Sync {
    /// Dial the room at `url` with `token`.
    ///
    /// With `force_relay` set, media must be routed through a TURN relay.
    /// Cancellation safety: dropping the returned future abandons the dial
    /// without leaking a session handle.
    async fn connect(
        &self,
        url: &str,
        token: &str,
        force_relay: bool,
    ) -> Result<(Box<dyn RoomSession>, mpsc::UnboundedReceiver<RoomEvent>), ConnectError>;
}
