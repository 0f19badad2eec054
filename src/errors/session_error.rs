/// Error types surfaced by the session manager and its collaborators.
///
/// Every variant is non-fatal: the manager stays usable and a fresh
/// `connect()` or `start_listening()` call is always permitted afterwards.
/// Data-channel decode failures are recovered inside the protocol layer and
/// never appear here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// The token service response was missing or malformed before any
    /// transport work began.
    #[error("credentials missing or malformed: {0}")]
    CredentialMissing(String),

    /// The connect attempt did not complete within the configured deadline.
    #[error("timed out connecting to the room; check network/firewall")]
    ConnectTimeout,

    /// The underlying peer connection could not be established, after the
    /// relay fallback was exhausted or unavailable.
    #[error("transport negotiation failed: {0}")]
    TransportNegotiationFailed(String),

    /// Microphone capture or publishing was refused by the platform.
    #[error("microphone permission failed: {0}")]
    MicPermissionDenied(String),

    /// No speech recognition engine is available on this platform.
    #[error("speech recognition is not supported on this platform")]
    SpeechUnsupported,

    /// The recognition engine reported an error while listening.
    #[error("speech recognition error: {0}")]
    Recognition(String),

    /// The room closed the session, remotely or through network loss.
    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("{0}")]
    Internal(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
