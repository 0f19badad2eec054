//! LiveKit implementation of the room backend seam.
//!
//! Translates LiveKit room events into the session manager's event model,
//! drains subscribed audio into a caller-provided callback, and publishes
//! the local audio source as the room's microphone track.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use livekit::options::TrackPublishOptions;
use livekit::prelude::{
    DataPacket, RemoteTrack, Room, RoomEvent as LkRoomEvent, RoomOptions,
};
use livekit::track::{LocalAudioTrack, LocalTrack, RemoteAudioTrack, TrackSource};
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::audio_stream::native::NativeAudioStream;
use livekit::webrtc::prelude::{AudioSourceOptions, IceTransportsType, RtcAudioSource};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::errors::SessionError;
use crate::session::backend::{
    AudioSink, ConnectError, ConnectionState, LocalMicTrack, MicPublishError, PlaybackBlocked,
    RemoteTrackInfo, RoomBackend, RoomEvent, RoomSession, TrackKind,
};

/// Callback receiving decoded remote audio as little-endian PCM16 bytes.
pub type AudioFrameCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Audio parameters for subscribing and publishing.
#[derive(Debug, Clone)]
pub struct LiveKitBackendConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for LiveKitBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
        }
    }
}

/// Room backend over the LiveKit SDK.
pub struct LiveKitBackend {
    config: LiveKitBackendConfig,
    audio_callback: Option<AudioFrameCallback>,
}

impl LiveKitBackend {
    pub fn new(config: LiveKitBackendConfig) -> Self {
        Self {
            config,
            audio_callback: None,
        }
    }

    /// Receive remote audio frames; without a callback, sinks drain and
    /// discard frames to keep subscriptions healthy.
    pub fn with_audio_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.audio_callback = Some(Arc::new(callback));
        self
    }
}

/// The SDK reports peer-connection negotiation failures as engine errors
/// without a dedicated variant, so classification falls back to message
/// inspection. The retry policy itself lives in the session manager and
/// only sees the structured result.
fn classify_connect_error(message: String) -> ConnectError {
    let lower = message.to_lowercase();
    if lower.contains("pc connection")
        || lower.contains("peer connection")
        || lower.contains("ice")
    {
        ConnectError::TransportNegotiation(message)
    } else if lower.contains("unauthorized") || lower.contains("invalid token") {
        ConnectError::Rejected(message)
    } else {
        ConnectError::Other(message)
    }
}

#[async_trait::async_trait]
impl RoomBackend for LiveKitBackend {
    async fn connect(
        &self,
        url: &str,
        token: &str,
        force_relay: bool,
    ) -> Result<(Box<dyn RoomSession>, mpsc::UnboundedReceiver<RoomEvent>), ConnectError> {
        info!("Connecting to LiveKit room at {url} (force_relay: {force_relay})");

        let mut options = RoomOptions::default();
        if force_relay {
            options.rtc_config.ice_transport_type = IceTransportsType::Relay;
        }

        let (room, mut lk_events) = Room::connect(url, token, options)
            .await
            .map_err(|e| classify_connect_error(format!("{e:?}")))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let remote_tracks: Arc<Mutex<HashMap<String, RemoteAudioTrack>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let session = LiveKitSession {
            room: Arc::new(room),
            config: self.config.clone(),
            audio_callback: self.audio_callback.clone(),
            remote_tracks: Arc::clone(&remote_tracks),
            mic: Mutex::new(None),
        };

        // Translate SDK events into the session manager's event model.
        tokio::spawn(async move {
            while let Some(event) = lk_events.recv().await {
                match event {
                    LkRoomEvent::TrackSubscribed {
                        track,
                        publication,
                        participant,
                    } => {
                        debug!(
                            "Track subscribed from participant {}",
                            participant.identity()
                        );
                        let info = match track {
                            RemoteTrack::Audio(audio_track) => {
                                let sid = publication.sid().to_string();
                                remote_tracks
                                    .lock()
                                    .await
                                    .insert(sid.clone(), audio_track);
                                RemoteTrackInfo {
                                    sid,
                                    kind: TrackKind::Audio,
                                }
                            }
                            RemoteTrack::Video(_) => RemoteTrackInfo {
                                sid: publication.sid().to_string(),
                                kind: TrackKind::Other,
                            },
                        };
                        if event_tx.send(RoomEvent::TrackSubscribed { track: info }).is_err() {
                            break;
                        }
                    }
                    LkRoomEvent::TrackUnsubscribed {
                        track, publication, ..
                    } => {
                        let sid = publication.sid().to_string();
                        let kind = match track {
                            RemoteTrack::Audio(_) => {
                                remote_tracks.lock().await.remove(&sid);
                                TrackKind::Audio
                            }
                            RemoteTrack::Video(_) => TrackKind::Other,
                        };
                        let info = RemoteTrackInfo { sid, kind };
                        if event_tx
                            .send(RoomEvent::TrackUnsubscribed { track: info })
                            .is_err()
                        {
                            break;
                        }
                    }
                    LkRoomEvent::DataReceived { payload, .. } => {
                        if event_tx
                            .send(RoomEvent::DataReceived {
                                payload: payload.to_vec(),
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    LkRoomEvent::Reconnecting => {
                        if event_tx
                            .send(RoomEvent::StateChanged(ConnectionState::Reconnecting))
                            .is_err()
                        {
                            break;
                        }
                    }
                    LkRoomEvent::Reconnected => {
                        if event_tx
                            .send(RoomEvent::StateChanged(ConnectionState::Connected))
                            .is_err()
                        {
                            break;
                        }
                    }
                    LkRoomEvent::Disconnected { reason } => {
                        let _ = event_tx.send(RoomEvent::Disconnected {
                            reason: Some(format!("{reason:?}")),
                        });
                        break;
                    }
                    other => {
                        debug!("Ignoring room event: {other:?}");
                    }
                }
            }
            info!("LiveKit event translation finished");
        });

        Ok((Box::new(session), event_rx))
    }
}

struct LiveKitSession {
    room: Arc<Room>,
    config: LiveKitBackendConfig,
    audio_callback: Option<AudioFrameCallback>,
    remote_tracks: Arc<Mutex<HashMap<String, RemoteAudioTrack>>>,
    mic: Mutex<Option<LocalAudioTrack>>,
}

/// A sink is a spawned drain task over the track's audio stream; detaching
/// aborts the task.
struct StreamSink {
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl AudioSink for StreamSink {
    fn play(&mut self) -> Result<(), PlaybackBlocked> {
        // Native playback has no autoplay policy; the drain task is already
        // running.
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for StreamSink {
    fn drop(&mut self) {
        self.detach();
    }
}

struct LiveKitMicTrack;

impl LocalMicTrack for LiveKitMicTrack {
    fn stop(&self) {
        // The audio source is dropped with the published track; nothing to
        // release beyond what unpublish already did.
    }
}

#[async_trait::async_trait]
impl RoomSession for LiveKitSession {
    fn attach_audio_sink(&self, track: &RemoteTrackInfo) -> Option<Box<dyn AudioSink>> {
        let audio_track = self.remote_tracks.try_lock().ok()?.get(&track.sid)?.clone();

        let rtc_track = audio_track.rtc_track();
        let mut stream = NativeAudioStream::new(
            rtc_track,
            self.config.sample_rate as i32,
            self.config.channels as i32,
        );
        let callback = self.audio_callback.clone();
        let sid = track.sid.clone();

        let handle = tokio::spawn(async move {
            debug!("Draining audio stream for track {sid}");
            while let Some(frame) = stream.next().await {
                if let Some(callback) = &callback {
                    let mut bytes = Vec::with_capacity(frame.data.len() * 2);
                    for sample in frame.data.iter() {
                        bytes.extend_from_slice(&sample.to_le_bytes());
                    }
                    callback(bytes);
                }
            }
            debug!("Audio stream ended for track {sid}");
        });

        Some(Box::new(StreamSink {
            handle: Some(handle),
        }))
    }

    async fn publish_data(&self, payload: Vec<u8>) -> Result<(), SessionError> {
        let packet = DataPacket {
            payload,
            reliable: true,
            ..Default::default()
        };

        self.room
            .local_participant()
            .publish_data(packet)
            .await
            .map_err(|e| SessionError::Internal(format!("Failed to publish data: {e:?}")))
    }

    async fn publish_microphone(&self) -> Result<Box<dyn LocalMicTrack>, MicPublishError> {
        let source_options = AudioSourceOptions {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        };
        let samples_per_frame = (self.config.sample_rate * 10) / 1000;
        let source = NativeAudioSource::new(
            source_options,
            self.config.sample_rate,
            self.config.channels as u32,
            samples_per_frame,
        );

        let track =
            LocalAudioTrack::create_audio_track("microphone", RtcAudioSource::Native(source));

        let publish_options = TrackPublishOptions {
            source: TrackSource::Microphone,
            ..Default::default()
        };

        match self
            .room
            .local_participant()
            .publish_track(LocalTrack::Audio(track.clone()), publish_options)
            .await
        {
            Ok(publication) => {
                info!("Published microphone track {}", publication.sid());
                *self.mic.lock().await = Some(track);
                Ok(Box::new(LiveKitMicTrack))
            }
            Err(e) => {
                error!("Failed to publish microphone track: {e:?}");
                let message = format!("{e:?}");
                if message.to_lowercase().contains("permission") {
                    Err(MicPublishError::PermissionDenied(message))
                } else {
                    Err(MicPublishError::Other(message))
                }
            }
        }
    }

    async fn unpublish_microphone(&self) -> Result<(), SessionError> {
        let track = self.mic.lock().await.take();
        let Some(track) = track else {
            return Ok(());
        };

        self.room
            .local_participant()
            .unpublish_track(&track.sid())
            .await
            .map(|_| ())
            .map_err(|e| SessionError::Internal(format!("Failed to unpublish microphone: {e:?}")))
    }

    async fn close(&self) {
        if let Err(e) = self.room.close().await {
            warn!("Error closing LiveKit room: {e:?}");
        }
    }
}
