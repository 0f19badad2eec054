//! duoroom: a headless client for real-time voice-agent rooms.
//!
//! The client joins a room through a pluggable transport backend, publishes
//! the local microphone, attaches remote audio, runs a continuously
//! restarting speech-capture loop, and exchanges typed JSON messages with
//! the agents over the reliable data channel into an append-only
//! transcript.

pub mod config;
pub mod errors;
pub mod protocol;
pub mod session;
pub mod speech;
pub mod token;
pub mod transcript;

#[cfg(feature = "livekit")]
pub mod livekit;

// Re-export commonly used items for convenience
pub use config::ClientConfig;
pub use errors::{SessionError, SessionResult};
pub use protocol::DataMessage;
pub use session::{SessionManager, SessionState, SessionStatus};
pub use token::{CredentialProvider, Credentials, TokenClient};
pub use transcript::{TranscriptEntry, TranscriptLog};
