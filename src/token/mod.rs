//! Token client for the backend credential service.
//!
//! Requests a room credential pair (`token`, `url`) before any transport
//! work starts. This client carries no retry logic of its own; failures
//! propagate to the session manager.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::SessionError;

/// Validated credentials for a single connection attempt.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Websocket URL of the media server.
    pub url: String,
    /// Access token scoped to the requested room and identity.
    pub token: String,
}

/// Request body for `POST /voice/token`.
#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    room: &'a str,
    identity: &'a str,
    name: &'a str,
}

/// Raw response from the token service, validated before use.
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
    pub token: Option<String>,
    pub url: Option<String>,
}

/// Response from `GET /voice/config`.
#[derive(Debug, Deserialize)]
struct VoiceConfigResponse {
    room: Option<String>,
}

/// Source of room credentials.
///
/// Abstracted so the session manager can be exercised without a live
/// backend; [`TokenClient`] is the HTTP implementation.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch credentials for joining `room` as `identity`.
    async fn fetch(
        &self,
        room: &str,
        identity: &str,
        name: &str,
    ) -> Result<Credentials, SessionError>;

    /// Optional server-side override of the default room name.
    ///
    /// Failure is non-fatal: callers keep their configured default.
    async fn room_override(&self) -> Option<String>;
}

/// HTTP client for the backend credential endpoints.
pub struct TokenClient {
    client: Client,
    base_url: String,
}

impl TokenClient {
    /// Create a client for the backend at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| SessionError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl CredentialProvider for TokenClient {
    async fn fetch(
        &self,
        room: &str,
        identity: &str,
        name: &str,
    ) -> Result<Credentials, SessionError> {
        let url = format!("{}/voice/token", self.base_url);
        let body = TokenRequest {
            room,
            identity,
            name,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::Internal(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SessionError::Internal(format!(
                "Token service returned {}",
                response.status()
            )));
        }

        let parsed = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| SessionError::CredentialMissing(format!("Unreadable token response: {e}")))?;

        validate_credentials(parsed)
    }

    async fn room_override(&self) -> Option<String> {
        let url = format!("{}/voice/config", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Voice config lookup failed, keeping default room: {e}");
                return None;
            }
        };

        match response.json::<VoiceConfigResponse>().await {
            Ok(config) => config.room.filter(|room| !room.is_empty()),
            Err(e) => {
                debug!("Voice config response unreadable, keeping default room: {e}");
                None
            }
        }
    }
}

/// Validate a token service response before any transport work begins.
///
/// The URL must carry a websocket scheme prefix and the token must be
/// non-empty; anything else is a `CredentialMissing` failure.
pub fn validate_credentials(response: TokenResponse) -> Result<Credentials, SessionError> {
    let url = match response.url {
        Some(url) if url.starts_with("ws") => url,
        Some(url) => {
            return Err(SessionError::CredentialMissing(format!(
                "media server URL is not a websocket address: {url}"
            )));
        }
        None => {
            return Err(SessionError::CredentialMissing(
                "media server URL is missing from the token response".to_string(),
            ));
        }
    };

    match response.token {
        Some(token) if !token.is_empty() => Ok(Credentials { url, token }),
        _ => Err(SessionError::CredentialMissing(
            "token is missing from the backend response".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_ws_and_wss() {
        for scheme_url in ["ws://localhost:7880", "wss://rooms.example.com"] {
            let credentials = validate_credentials(TokenResponse {
                token: Some("jwt".to_string()),
                url: Some(scheme_url.to_string()),
            })
            .unwrap();
            assert_eq!(credentials.url, scheme_url);
            assert_eq!(credentials.token, "jwt");
        }
    }

    #[test]
    fn test_validate_rejects_non_websocket_url() {
        let result = validate_credentials(TokenResponse {
            token: Some("jwt".to_string()),
            url: Some("http://rooms.example.com".to_string()),
        });
        assert!(matches!(result, Err(SessionError::CredentialMissing(_))));
    }

    #[test]
    fn test_validate_rejects_missing_url() {
        let result = validate_credentials(TokenResponse {
            token: Some("jwt".to_string()),
            url: None,
        });
        assert!(matches!(result, Err(SessionError::CredentialMissing(_))));
    }

    #[test]
    fn test_validate_rejects_missing_or_empty_token() {
        for token in [None, Some(String::new())] {
            let result = validate_credentials(TokenResponse {
                token,
                url: Some("wss://rooms.example.com".to_string()),
            });
            assert!(matches!(result, Err(SessionError::CredentialMissing(_))));
        }
    }

    #[test]
    fn test_token_client_trims_trailing_slash() {
        let client = TokenClient::new("http://localhost:8000/").unwrap();
        assert_eq!(client.base_url, "http://localhost:8000");
    }
}
