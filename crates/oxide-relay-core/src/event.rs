//! Inbound webhook payloads and the events extracted from them.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Value of the top-level `object` field for Instagram messaging webhooks.
pub const INSTAGRAM_OBJECT: &str = "instagram";

/// Top-level webhook body.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookPayload {
    /// Event source discriminator
    #[serde(default)]
    pub object: Option<String>,
    /// Batched entries
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

/// One entry of a webhook batch.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookEntry {
    /// Messaging events in this entry
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

/// A single messaging event.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MessagingEvent {
    /// Sending user
    #[serde(default)]
    pub sender: Option<Participant>,
    /// Receiving account
    #[serde(default)]
    pub recipient: Option<Participant>,
    /// Message body, absent for reads/reactions/etc.
    #[serde(default)]
    pub message: Option<MessageBody>,
}

/// Sender or recipient reference.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Participant {
    /// Platform-scoped id
    #[serde(default)]
    pub id: Option<String>,
}

/// Message content.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MessageBody {
    /// Text, absent for attachment-only messages
    #[serde(default)]
    pub text: Option<String>,
}

/// A text message ready for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Sending user id
    pub sender_id: String,
    /// Receiving account id, if present
    pub recipient_id: Option<String>,
    /// Message text
    pub text: String,
}

impl MessagingEvent {
    /// Convert into an `InboundEvent`, or `None` when sender or text is missing.
    #[must_use]
    pub fn into_inbound(self) -> Option<InboundEvent> {
        let sender_id = self.sender.and_then(|p| p.id).filter(|id| !id.is_empty())?;
        let text = self.message.and_then(|m| m.text)?;
        Some(InboundEvent {
            sender_id,
            recipient_id: self.recipient.and_then(|p| p.id),
            text,
        })
    }
}

impl WebhookPayload {
    /// Whether the payload comes from the Instagram messaging product.
    #[must_use]
    pub fn is_instagram(&self) -> bool {
        self.object.as_deref() == Some(INSTAGRAM_OBJECT)
    }

    /// Extract text events; other sources and malformed events are dropped.
    #[must_use]
    pub fn into_events(self) -> Vec<InboundEvent> {
        if !self.is_instagram() {
            debug!(object = ?self.object, "Ignoring webhook from unsupported source");
            return Vec::new();
        }

        let mut events = Vec::new();
        for event in self.entry.into_iter().flat_map(|e| e.messaging) {
            match event.into_inbound() {
                Some(inbound) => events.push(inbound),
                None => debug!("Dropping messaging event without sender or text"),
            }
        }
        events
    }
}
