//! Observable session state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Connection state of the session, as seen by the UI layer.
///
/// `Error` is reserved for connect attempts that never reached `Connected`;
/// once connected, later failures surface as messages while the state
/// returns to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Point-in-time snapshot of the observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub error: Option<String>,
    pub relay_forced: bool,
    pub mic_sharing: bool,
}

/// Shared mutable state behind the session manager.
///
/// One explicit state enum plus a small number of intent flags; every
/// transition goes through the methods here so the connect/disconnect
/// invariants stay in one place.
pub(crate) struct SharedState {
    state: Mutex<SessionState>,
    error: Mutex<Option<String>>,
    relay_forced: AtomicBool,
    mic_sharing: AtomicBool,
}

impl SharedState {
    pub(crate) fn new(force_relay: bool) -> Self {
        Self {
            state: Mutex::new(SessionState::Disconnected),
            error: Mutex::new(None),
            relay_forced: AtomicBool::new(force_relay),
            mic_sharing: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Enter `Connecting` iff no connect is already in flight and the
    /// session is not connected. Clears any prior error text on success.
    pub(crate) fn begin_connect(&self) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *state {
            SessionState::Connecting | SessionState::Connected => false,
            SessionState::Disconnected | SessionState::Error => {
                *state = SessionState::Connecting;
                drop(state);
                self.clear_error();
                true
            }
        }
    }

    pub(crate) fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn set_error(&self, message: impl Into<String>) {
        *self
            .error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(message.into());
    }

    pub(crate) fn clear_error(&self) {
        *self
            .error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    pub(crate) fn relay_forced(&self) -> bool {
        self.relay_forced.load(Ordering::Acquire)
    }

    /// Escalate to relay routing; sticky for the lifetime of the session.
    pub(crate) fn force_relay(&self) {
        self.relay_forced.store(true, Ordering::Release);
    }

    pub(crate) fn mic_sharing(&self) -> bool {
        self.mic_sharing.load(Ordering::Acquire)
    }

    pub(crate) fn set_mic_sharing(&self, sharing: bool) {
        self.mic_sharing.store(sharing, Ordering::Release);
    }

    pub(crate) fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            error: self.error(),
            relay_forced: self.relay_forced(),
            mic_sharing: self.mic_sharing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_connect_guards_in_flight_attempts() {
        let shared = SharedState::new(false);
        assert!(shared.begin_connect());
        assert_eq!(shared.state(), SessionState::Connecting);
        // A second call while Connecting is refused.
        assert!(!shared.begin_connect());

        shared.set_state(SessionState::Connected);
        assert!(!shared.begin_connect());
    }

    #[test]
    fn test_begin_connect_reenters_from_error_and_clears_message() {
        let shared = SharedState::new(false);
        shared.set_state(SessionState::Error);
        shared.set_error("transport negotiation failed: pc");

        assert!(shared.begin_connect());
        assert_eq!(shared.state(), SessionState::Connecting);
        assert_eq!(shared.error(), None);
    }

    #[test]
    fn test_relay_escalation_is_sticky() {
        let shared = SharedState::new(false);
        assert!(!shared.relay_forced());
        shared.force_relay();
        assert!(shared.relay_forced());
    }
}
