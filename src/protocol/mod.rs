//! Data channel message protocol.
//!
//! Typed JSON messages exchanged over the session's reliable data channel.
//! The protocol is intentionally minimal and forward-compatible: unknown or
//! malformed payloads decode to `None` and are dropped silently, so adding
//! a new message type never requires touching the error path here.

use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_speaker() -> String {
    "Agent".to_string()
}

/// A structured message on the reliable data channel.
///
/// Wire format is UTF-8 JSON with a `type` tag:
/// `{"type":"user_text","text":"..."}` outbound and
/// `{"type":"agent_text","speaker":"...","text":"..."}` inbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DataMessage {
    /// Text spoken or typed by the local user.
    #[serde(rename = "user_text")]
    UserText { text: String },

    /// Text produced by a remote agent. Missing fields fall back to a
    /// generic speaker and an empty string rather than failing the decode.
    #[serde(rename = "agent_text")]
    AgentText {
        #[serde(default = "default_speaker")]
        speaker: String,
        #[serde(default)]
        text: String,
    },
}

impl DataMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::UserText { text: text.into() }
    }
}

/// Serialize a message to its canonical JSON byte encoding.
pub fn encode(message: &DataMessage) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(message)
}

/// Decode a data channel payload.
///
/// Returns `None` for malformed JSON and for unrecognized `type` values;
/// a parse failure must never propagate into the session state machine.
pub fn decode(payload: &[u8]) -> Option<DataMessage> {
    match serde_json::from_slice::<DataMessage>(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!("Dropping undecodable data channel payload: {e}");
            None
        }
    }
}
