//! Instagram Graph API messaging client.

use crate::config::InstagramSettings;
use crate::resilient::retry_graph_operation;
use async_trait::async_trait;
use oxide_relay_core::MediaKind;
use oxide_relay_runtime::{ChatTransport, TransportError, TypingState};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Sends messages, attachments and typing indicators through the Graph API.
pub struct GraphClient {
    http: reqwest::Client,
    messages_url: String,
    access_token: String,
}

impl GraphClient {
    /// Build a client from transport settings.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Network` if the HTTP client cannot be built.
    pub fn new(settings: &InstagramSettings) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            http,
            messages_url: settings.messages_url(),
            access_token: settings
                .instagram_access_token
                .clone()
                .unwrap_or_default(),
        })
    }

    async fn post_message(&self, payload: Value) -> Result<(), TransportError> {
        let http = &self.http;
        let url = self.messages_url.as_str();
        let token = self.access_token.as_str();
        let payload = &payload;

        retry_graph_operation(move || async move {
            let response = http
                .post(url)
                .query(&[("access_token", token)])
                .json(payload)
                .send()
                .await
                // The URL carries the access token
                .map_err(|e| TransportError::Network(e.without_url().to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let body = response.text().await.unwrap_or_default();
            Err(TransportError::Api {
                status: status.as_u16(),
                body,
            })
        })
        .await
    }
}

/// Body of a text message.
#[must_use]
pub fn text_payload(user_id: &str, text: &str) -> Value {
    json!({
        "recipient": {"id": user_id},
        "message": {"text": text}
    })
}

/// Body of an attachment sent by URL.
#[must_use]
pub fn media_payload(user_id: &str, kind: MediaKind, url: &str) -> Value {
    json!({
        "recipient": {"id": user_id},
        "message": {
            "attachment": {
                "type": kind.as_str(),
                "payload": {"url": url}
            }
        }
    })
}

/// Body of a `typing_on` / `typing_off` sender action.
#[must_use]
pub fn typing_payload(user_id: &str, state: TypingState) -> Value {
    json!({
        "recipient": {"id": user_id},
        "sender_action": format!("typing_{}", state.as_str())
    })
}

#[async_trait]
impl ChatTransport for GraphClient {
    async fn send_text(&self, user_id: &str, text: &str) -> Result<(), TransportError> {
        self.post_message(text_payload(user_id, text)).await?;
        info!(user_id = %user_id, "Message sent");
        Ok(())
    }

    async fn send_media(
        &self,
        user_id: &str,
        kind: MediaKind,
        reference: &str,
    ) -> Result<(), TransportError> {
        self.post_message(media_payload(user_id, kind, reference))
            .await?;
        info!(user_id = %user_id, kind = %kind, "Attachment sent");
        Ok(())
    }

    async fn set_typing(&self, user_id: &str, state: TypingState) -> Result<(), TransportError> {
        self.post_message(typing_payload(user_id, state)).await?;
        debug!(user_id = %user_id, state = state.as_str(), "Typing indicator set");
        Ok(())
    }
}
