//! Track lifecycle: remote audio sinks and the local microphone.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::errors::SessionError;

use super::backend::{
    AudioSink, LocalMicTrack, MicPublishError, RemoteTrackInfo, RoomSession, TrackKind,
};

/// State of the local microphone slot.
///
/// `Pending` marks a create/publish in flight; a second enable while
/// pending or published is a no-op, which keeps at most one live mic track
/// per session. A disable that lands while pending sets `cancelled`, and
/// the resolving publish then releases the track instead of adopting it,
/// so a teardown racing a slow permission prompt can never strand a live
/// device.
enum MicSlot {
    Idle,
    Pending { cancelled: bool },
    Published(Box<dyn LocalMicTrack>),
}

/// Owns every media resource of the session: the sinks attached to remote
/// audio tracks and the (at most one) published microphone track. Nothing
/// outside this type touches either.
pub struct TrackLifecycle {
    sinks: Mutex<HashMap<String, Vec<Box<dyn AudioSink>>>>,
    mic: tokio::sync::Mutex<MicSlot>,
}

impl TrackLifecycle {
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(HashMap::new()),
            mic: tokio::sync::Mutex::new(MicSlot::Idle),
        }
    }

    /// Attach a playable sink for a newly subscribed remote track.
    ///
    /// Non-audio tracks are ignored. When autoplay is blocked, playback is
    /// attempted once more; a second refusal leaves the sink attached but
    /// paused for manual resume, and never errors the session.
    pub fn attach_remote(&self, session: &dyn RoomSession, track: &RemoteTrackInfo) {
        if track.kind != TrackKind::Audio {
            debug!("Ignoring non-audio track {}", track.sid);
            return;
        }

        let Some(mut sink) = session.attach_audio_sink(track) else {
            debug!("Track {} vanished before a sink could attach", track.sid);
            return;
        };

        if sink.play().is_err() && sink.play().is_err() {
            warn!(
                "Autoplay blocked for track {}; leaving sink paused for manual resume",
                track.sid
            );
        }

        self.sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(track.sid.clone())
            .or_default()
            .push(sink);
        info!("Attached audio sink for track {}", track.sid);
    }

    /// Detach and remove every sink created for a track. Symmetric with
    /// [`attach_remote`](Self::attach_remote): no sinks survive the
    /// unsubscribe.
    pub fn detach_remote(&self, track: &RemoteTrackInfo) {
        if track.kind != TrackKind::Audio {
            return;
        }

        let removed = self
            .sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&track.sid);

        if let Some(sinks) = removed {
            for mut sink in sinks {
                sink.detach();
            }
            info!("Detached audio sinks for track {}", track.sid);
        }
    }

    /// Detach every remaining sink. Used on session teardown.
    pub fn detach_all(&self) {
        let drained: Vec<_> = self
            .sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .collect();

        for (sid, sinks) in drained {
            for mut sink in sinks {
                sink.detach();
            }
            debug!("Detached audio sinks for track {sid} during teardown");
        }
    }

    /// Number of live sinks for a track. Zero after unsubscribe.
    pub fn sink_count(&self, sid: &str) -> usize {
        self.sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(sid)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Create and publish the local microphone track.
    ///
    /// Single-flight: a no-op while a publish is pending or a track is
    /// already live. A permission failure leaves no dangling track
    /// reference behind.
    pub async fn enable_publish(&self, session: &dyn RoomSession) -> Result<(), SessionError> {
        {
            let mut slot = self.mic.lock().await;
            match *slot {
                MicSlot::Pending { .. } | MicSlot::Published(_) => return Ok(()),
                MicSlot::Idle => *slot = MicSlot::Pending { cancelled: false },
            }
        }

        match session.publish_microphone().await {
            Ok(track) => {
                let mut slot = self.mic.lock().await;
                if matches!(*slot, MicSlot::Pending { cancelled: true }) {
                    *slot = MicSlot::Idle;
                    drop(slot);
                    track.stop();
                    info!("Released microphone track published past a teardown");
                    return Ok(());
                }
                *slot = MicSlot::Published(track);
                info!("Published local microphone track");
                Ok(())
            }
            Err(e) => {
                *self.mic.lock().await = MicSlot::Idle;
                match e {
                    MicPublishError::PermissionDenied(message) => {
                        Err(SessionError::MicPermissionDenied(message))
                    }
                    MicPublishError::Other(message) => Err(SessionError::Internal(message)),
                }
            }
        }
    }

    /// Unpublish and release the local microphone track.
    ///
    /// Unpublishing is best-effort (failures are logged, not fatal); the
    /// device release always happens. Safe to call with no session on
    /// teardown paths where the room is already gone.
    pub async fn disable_publish(&self, session: Option<&dyn RoomSession>) {
        let track = {
            let mut slot = self.mic.lock().await;
            match std::mem::replace(&mut *slot, MicSlot::Idle) {
                MicSlot::Published(track) => track,
                MicSlot::Pending { .. } => {
                    // A publish is still in flight; mark it cancelled so
                    // the resolving track is stopped instead of adopted.
                    *slot = MicSlot::Pending { cancelled: true };
                    return;
                }
                MicSlot::Idle => return,
            }
        };

        if let Some(session) = session {
            if let Err(e) = session.unpublish_microphone().await {
                warn!("Failed to unpublish microphone track: {e}");
            }
        }

        // Release is unconditional, even when the unpublish failed.
        track.stop();
        info!("Released local microphone track");
    }

    /// Whether a microphone track is currently published.
    pub async fn mic_published(&self) -> bool {
        matches!(*self.mic.lock().await, MicSlot::Published(_))
    }
}

impl Default for TrackLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::backend::PlaybackBlocked;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct MockSessionState {
        live_sinks: AtomicUsize,
        publishes: AtomicUsize,
        unpublishes: AtomicUsize,
        deny_mic: AtomicBool,
        fail_unpublish: AtomicBool,
        mic_stopped: AtomicBool,
        block_playback: AtomicBool,
        publish_delay: Mutex<Option<Duration>>,
    }

    struct MockSession {
        state: Arc<MockSessionState>,
    }

    struct MockSink {
        state: Arc<MockSessionState>,
        detached: bool,
    }

    impl AudioSink for MockSink {
        fn play(&mut self) -> Result<(), PlaybackBlocked> {
            if self.state.block_playback.load(Ordering::SeqCst) {
                Err(PlaybackBlocked)
            } else {
                Ok(())
            }
        }

        fn detach(&mut self) {
            if !self.detached {
                self.detached = true;
                self.state.live_sinks.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    struct MockMicTrack {
        state: Arc<MockSessionState>,
    }

    impl LocalMicTrack for MockMicTrack {
        fn stop(&self) {
            self.state.mic_stopped.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl RoomSession for MockSession {
        fn attach_audio_sink(&self, _track: &RemoteTrackInfo) -> Option<Box<dyn AudioSink>> {
            self.state.live_sinks.fetch_add(1, Ordering::SeqCst);
            Some(Box::new(MockSink {
                state: Arc::clone(&self.state),
                detached: false,
            }))
        }

        async fn publish_data(&self, _payload: Vec<u8>) -> Result<(), SessionError> {
            Ok(())
        }

        async fn publish_microphone(&self) -> Result<Box<dyn LocalMicTrack>, MicPublishError> {
            let delay = *self.state.publish_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.state.deny_mic.load(Ordering::SeqCst) {
                return Err(MicPublishError::PermissionDenied(
                    "Permission denied by user".to_string(),
                ));
            }
            self.state.publishes.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockMicTrack {
                state: Arc::clone(&self.state),
            }))
        }

        async fn unpublish_microphone(&self) -> Result<(), SessionError> {
            self.state.unpublishes.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_unpublish.load(Ordering::SeqCst) {
                Err(SessionError::Internal("unpublish failed".to_string()))
            } else {
                Ok(())
            }
        }

        async fn close(&self) {}
    }

    fn mock_session() -> (MockSession, Arc<MockSessionState>) {
        let state = Arc::new(MockSessionState::default());
        (
            MockSession {
                state: Arc::clone(&state),
            },
            state,
        )
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe_symmetry() {
        let (session, state) = mock_session();
        let tracks = TrackLifecycle::new();
        let info = RemoteTrackInfo::audio("TR_1");

        tracks.attach_remote(&session, &info);
        tracks.attach_remote(&session, &info);
        assert_eq!(tracks.sink_count("TR_1"), 2);

        tracks.detach_remote(&info);
        assert_eq!(tracks.sink_count("TR_1"), 0);
        assert_eq!(state.live_sinks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_audio_tracks_are_ignored() {
        let (session, state) = mock_session();
        let tracks = TrackLifecycle::new();
        let info = RemoteTrackInfo {
            sid: "TR_video".to_string(),
            kind: TrackKind::Other,
        };

        tracks.attach_remote(&session, &info);
        assert_eq!(tracks.sink_count("TR_video"), 0);
        assert_eq!(state.live_sinks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blocked_autoplay_keeps_sink_attached() {
        let (session, state) = mock_session();
        state.block_playback.store(true, Ordering::SeqCst);
        let tracks = TrackLifecycle::new();
        let info = RemoteTrackInfo::audio("TR_blocked");

        tracks.attach_remote(&session, &info);
        // Paused, but attached and removable.
        assert_eq!(tracks.sink_count("TR_blocked"), 1);

        tracks.detach_remote(&info);
        assert_eq!(state.live_sinks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_detach_all_drains_every_track() {
        let (session, state) = mock_session();
        let tracks = TrackLifecycle::new();
        tracks.attach_remote(&session, &RemoteTrackInfo::audio("TR_a"));
        tracks.attach_remote(&session, &RemoteTrackInfo::audio("TR_b"));

        tracks.detach_all();
        assert_eq!(state.live_sinks.load(Ordering::SeqCst), 0);
        assert_eq!(tracks.sink_count("TR_a"), 0);
        assert_eq!(tracks.sink_count("TR_b"), 0);
    }

    #[tokio::test]
    async fn test_enable_publish_is_single_flight() {
        let (session, state) = mock_session();
        *state.publish_delay.lock().unwrap() = Some(Duration::from_millis(30));
        let tracks = TrackLifecycle::new();

        let (first, second) = tokio::join!(
            tracks.enable_publish(&session),
            tracks.enable_publish(&session)
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(state.publishes.load(Ordering::SeqCst), 1);
        assert!(tracks.mic_published().await);
    }

    #[tokio::test]
    async fn test_enable_publish_twice_sequential_publishes_once() {
        let (session, state) = mock_session();
        let tracks = TrackLifecycle::new();

        tracks.enable_publish(&session).await.unwrap();
        tracks.enable_publish(&session).await.unwrap();

        assert_eq!(state.publishes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disable_during_pending_publish_releases_resolving_track() {
        let (session, state) = mock_session();
        *state.publish_delay.lock().unwrap() = Some(Duration::from_millis(30));
        let tracks = TrackLifecycle::new();

        // The disable lands while the publish is still awaiting the
        // (slow) device; the track that resolves afterwards must be
        // released, not adopted.
        let (publish, ()) = tokio::join!(tracks.enable_publish(&session), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tracks.disable_publish(Some(&session)).await;
        });
        publish.unwrap();

        assert!(state.mic_stopped.load(Ordering::SeqCst));
        assert!(!tracks.mic_published().await);
    }

    #[tokio::test]
    async fn test_permission_denied_leaves_no_dangling_track() {
        let (session, state) = mock_session();
        state.deny_mic.store(true, Ordering::SeqCst);
        let tracks = TrackLifecycle::new();

        let result = tracks.enable_publish(&session).await;
        assert!(matches!(result, Err(SessionError::MicPermissionDenied(_))));
        assert!(!tracks.mic_published().await);

        // The slot is reusable after the failure.
        state.deny_mic.store(false, Ordering::SeqCst);
        tracks.enable_publish(&session).await.unwrap();
        assert!(tracks.mic_published().await);
    }

    #[tokio::test]
    async fn test_disable_publish_releases_even_when_unpublish_fails() {
        let (session, state) = mock_session();
        state.fail_unpublish.store(true, Ordering::SeqCst);
        let tracks = TrackLifecycle::new();

        tracks.enable_publish(&session).await.unwrap();
        tracks.disable_publish(Some(&session)).await;

        assert_eq!(state.unpublishes.load(Ordering::SeqCst), 1);
        assert!(state.mic_stopped.load(Ordering::SeqCst));
        assert!(!tracks.mic_published().await);
    }

    #[tokio::test]
    async fn test_disable_publish_without_track_is_noop() {
        let (session, state) = mock_session();
        let tracks = TrackLifecycle::new();

        tracks.disable_publish(Some(&session)).await;
        assert_eq!(state.unpublishes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disable_publish_without_session_still_releases() {
        let (session, state) = mock_session();
        let tracks = TrackLifecycle::new();
        tracks.enable_publish(&session).await.unwrap();

        // Room already gone; the device must still be released.
        tracks.disable_publish(None).await;
        assert!(state.mic_stopped.load(Ordering::SeqCst));
        assert!(!tracks.mic_published().await);
    }
}
