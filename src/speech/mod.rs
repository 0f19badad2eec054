//! Continuous speech capture over a one-shot recognition engine.
//!
//! The platform engine processes a single utterance per activation and then
//! stops itself; [`SpeechCapture`] restarts it so the loop appears
//! continuous to callers.

mod capture;

pub use capture::{SpeechCapture, UtteranceCallback};

use std::sync::Arc;

/// Events emitted by a recognition engine.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// The engine began an activation.
    Started,
    /// The engine stopped, for any reason other than an error.
    Ended,
    /// A recognition hypothesis. Only final results are acted on.
    Result { transcript: String, is_final: bool },
    /// The engine failed; it will not restart on its own.
    Error(String),
}

/// Error raised when the engine refuses to start an activation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("recognition engine failed to start: {0}")]
pub struct EngineStartError(pub String);

/// A platform speech-recognition engine.
///
/// Implementations deliver [`RecognitionEvent`]s on the channel handed to
/// [`SpeechCapture::new`]. One activation transcribes one utterance; the
/// engine fires `Ended` when it stops itself.
pub trait RecognitionEngine: Send + Sync {
    /// Begin one activation.
    fn start(&self) -> Result<(), EngineStartError>;

    /// Request a graceful stop; the engine will still fire `Ended`.
    fn stop(&self);

    /// Forcibly abort the engine and release its resources.
    fn abort(&self);
}

/// Shared handle to a recognition engine.
pub type EngineHandle = Arc<dyn RecognitionEngine>;
