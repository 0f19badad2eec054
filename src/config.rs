//! Client configuration.
//!
//! Values are loaded from environment variables with sensible defaults so
//! the client works against a local backend out of the box.

use std::env;
use std::time::Duration;

/// Default hard deadline for a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 12_000;

/// Delay before restarting the recognition engine after it ends naturally.
/// Keeps platforms that fire end/start rapidly out of tight restart loops.
pub const DEFAULT_RESTART_DELAY_MS: u64 = 200;

/// Configuration for a room client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend that issues room credentials.
    pub backend_url: String,
    /// Room to join; may be overridden by the backend's `/voice/config`.
    pub room_name: String,
    /// Display name sent with the token request.
    pub display_name: String,
    /// Speaker label used for locally produced transcript entries.
    pub local_speaker_label: String,
    /// Hard deadline for a single connect attempt.
    pub connect_timeout: Duration,
    /// Delay before auto-restarting the recognition engine.
    pub restart_delay: Duration,
    /// Route media through a TURN relay from the first attempt. Escalated
    /// automatically by the retry policy on transport-negotiation failures.
    pub force_relay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            room_name: "agents-duo".to_string(),
            display_name: "You".to_string(),
            local_speaker_label: "You".to_string(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
            force_relay: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Also loads from a .env file if present using dotenvy. Missing
    /// variables fall back to the defaults above.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();

        let backend_url =
            env::var("DUOROOM_BACKEND_URL").unwrap_or(defaults.backend_url);
        let room_name = env::var("DUOROOM_ROOM").unwrap_or(defaults.room_name);
        let display_name =
            env::var("DUOROOM_DISPLAY_NAME").unwrap_or(defaults.display_name);
        let local_speaker_label =
            env::var("DUOROOM_SPEAKER_LABEL").unwrap_or(defaults.local_speaker_label);

        let connect_timeout_ms = match env::var("DUOROOM_CONNECT_TIMEOUT_MS") {
            Ok(value) => value
                .parse::<u64>()
                .map_err(|e| format!("Invalid DUOROOM_CONNECT_TIMEOUT_MS: {e}"))?,
            Err(_) => DEFAULT_CONNECT_TIMEOUT_MS,
        };

        let force_relay = env::var("DUOROOM_FORCE_RELAY")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);

        Ok(Self {
            backend_url,
            room_name,
            display_name,
            local_speaker_label,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
            force_relay,
        })
    }
}

/// Parse a boolean value from a string, supporting multiple formats
///
/// Accepts: "true", "false", "1", "0", "yes", "no" (case insensitive)
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_millis(12_000));
        assert_eq!(config.restart_delay, Duration::from_millis(200));
        assert!(!config.force_relay);
        assert_eq!(config.local_speaker_label, "You");
    }

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("No"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }
}
