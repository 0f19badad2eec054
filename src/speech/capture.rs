//! The speech capture loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::SessionError;

use super::{EngineHandle, RecognitionEvent};

/// Callback invoked with each finalized, trimmed, non-empty utterance.
pub type UtteranceCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Callback invoked with recognition error messages.
pub type RecognitionErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Continuous capture loop over a one-shot recognition engine.
///
/// Two independent state bits drive the loop:
///
/// * `should_listen` is the caller's intent. Only [`stop`](Self::stop)
///   clears it, which is the only way auto-restart is suppressed.
/// * `listening` tracks the engine's own running state, derived from its
///   `Started`/`Ended` events. The engine stops asynchronously for reasons
///   other than an explicit stop, so the two bits must stay decoupled.
///
/// Reconciliation rule: on `Ended`, if intent is still set, restart the
/// engine after a short delay; on `Error`, clear the running bit but leave
/// the intent alone and do not retry, so a failing engine cannot spin.
pub struct SpeechCapture {
    engine: Option<EngineHandle>,
    should_listen: Arc<AtomicBool>,
    listening: Arc<AtomicBool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechCapture {
    /// Build a capture loop around `engine`, consuming its event stream.
    ///
    /// Pass `None` when the platform has no recognition support; every
    /// `start()` then surfaces [`SessionError::SpeechUnsupported`].
    pub fn new(
        engine: Option<(EngineHandle, mpsc::UnboundedReceiver<RecognitionEvent>)>,
        restart_delay: Duration,
        on_utterance: UtteranceCallback,
        on_error: RecognitionErrorCallback,
    ) -> Self {
        let should_listen = Arc::new(AtomicBool::new(false));
        let listening = Arc::new(AtomicBool::new(false));

        let (engine, loop_handle) = match engine {
            Some((engine, events)) => {
                let handle = Self::spawn_event_loop(
                    Arc::clone(&engine),
                    events,
                    Arc::clone(&should_listen),
                    Arc::clone(&listening),
                    restart_delay,
                    on_utterance,
                    on_error,
                );
                (Some(engine), Some(handle))
            }
            None => (None, None),
        };

        Self {
            engine,
            should_listen,
            listening,
            loop_handle: Mutex::new(loop_handle),
        }
    }

    fn spawn_event_loop(
        engine: EngineHandle,
        mut events: mpsc::UnboundedReceiver<RecognitionEvent>,
        should_listen: Arc<AtomicBool>,
        listening: Arc<AtomicBool>,
        restart_delay: Duration,
        on_utterance: UtteranceCallback,
        on_error: RecognitionErrorCallback,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    RecognitionEvent::Started => {
                        listening.store(true, Ordering::Release);
                    }
                    RecognitionEvent::Ended => {
                        listening.store(false, Ordering::Release);
                        if should_listen.load(Ordering::Acquire) {
                            // The delay must not stall the loop; an error
                            // queued right behind the end still has to be
                            // seen promptly. Restart from a side task.
                            let engine = Arc::clone(&engine);
                            let should_listen = Arc::clone(&should_listen);
                            tokio::spawn(async move {
                                tokio::time::sleep(restart_delay).await;
                                // The intent can be withdrawn during the
                                // delay.
                                if should_listen.load(Ordering::Acquire) {
                                    if let Err(e) = engine.start() {
                                        // Swallow and wait for the next
                                        // natural end/retry cycle.
                                        debug!("Recognition restart failed: {e}");
                                    }
                                }
                            });
                        }
                    }
                    RecognitionEvent::Result {
                        transcript,
                        is_final,
                    } => {
                        if !is_final {
                            continue;
                        }
                        let text = transcript.trim();
                        if !text.is_empty() {
                            on_utterance(text.to_string());
                        }
                    }
                    RecognitionEvent::Error(message) => {
                        listening.store(false, Ordering::Release);
                        warn!("Recognition engine error: {message}");
                        on_error(message);
                    }
                }
            }
            debug!("Recognition event loop finished");
        })
    }

    /// Begin (or keep) listening.
    ///
    /// No-op when the engine is already running. Engine-start failures
    /// surface without altering the listening intent.
    pub fn start(&self) -> Result<(), SessionError> {
        let Some(engine) = &self.engine else {
            return Err(SessionError::SpeechUnsupported);
        };

        if self.listening.load(Ordering::Acquire) {
            return Ok(());
        }

        self.should_listen.store(true, Ordering::Release);
        engine
            .start()
            .map_err(|e| SessionError::Recognition(e.to_string()))
    }

    /// Stop listening. This is the only path that suppresses auto-restart.
    pub fn stop(&self) {
        self.should_listen.store(false, Ordering::Release);
        if let Some(engine) = &self.engine {
            engine.stop();
        }
    }

    /// Whether the engine is currently running an activation.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Whether the caller still intends to listen.
    pub fn should_listen(&self) -> bool {
        self.should_listen.load(Ordering::Acquire)
    }

    /// Forcibly abort the engine and release its event handlers, regardless
    /// of the current intent. Called when the owning session ends.
    pub fn teardown(&self) {
        self.should_listen.store(false, Ordering::Release);
        self.listening.store(false, Ordering::Release);
        if let Some(engine) = &self.engine {
            engine.abort();
        }
        if let Some(handle) = self
            .loop_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for SpeechCapture {
    fn drop(&mut self) {
        self.teardown();
    }
}
