//! Outbound messaging transport seam.

use async_trait::async_trait;
use oxide_relay_core::MediaKind;
use thiserror::Error;

/// Errors reported by a messaging transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request could not be sent or the connection failed
    #[error("Network error: {0}")]
    Network(String),
    /// The platform answered with a non-success status
    #[error("API error ({status}): {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },
    /// The call did not finish in time
    #[error("Transport call timed out after {0}s")]
    Timeout(u64),
}

impl TransportError {
    /// Whether retrying the same call may succeed (network failures, 429 and 5xx).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Typing indicator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    /// Show the indicator
    On,
    /// Hide the indicator
    Off,
}

impl TypingState {
    /// Suffix used by `typing_on` / `typing_off` sender actions.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

/// Delivers replies to a messaging platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync + 'static {
    /// Send a text message.
    async fn send_text(&self, user_id: &str, text: &str) -> Result<(), TransportError>;

    /// Send an image or audio attachment by URL.
    async fn send_media(
        &self,
        user_id: &str,
        kind: MediaKind,
        reference: &str,
    ) -> Result<(), TransportError>;

    /// Toggle the typing indicator.
    async fn set_typing(&self, user_id: &str, state: TypingState) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_not_transient() {
        let bad_request = TransportError::Api {
            status: 400,
            body: String::new(),
        };
        let unavailable = TransportError::Api {
            status: 503,
            body: String::new(),
        };
        assert!(!bad_request.is_transient());
        assert!(unavailable.is_transient());
        assert!(TransportError::Network("reset".to_string()).is_transient());
    }
}
