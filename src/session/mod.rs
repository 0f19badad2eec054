//! Live session connection management.
//!
//! The [`SessionManager`] orchestrates room connectivity (with timeout and
//! relay fallback), the track lifecycle, the data channel protocol, and the
//! speech capture loop behind a small UI-facing surface. The transport
//! itself lives behind the [`backend`] traits.

pub mod backend;

mod events;
mod manager;
mod state;
mod tracks;

pub use manager::SessionManager;
pub use state::{SessionState, SessionStatus};
pub use tracks::TrackLifecycle;
