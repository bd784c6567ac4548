#![deny(missing_docs)]
//! Oxide Relay core library.
//!
//! Session state, keyword triggers, typing delays and the language-model
//! responder shared by the relay runtime and transports.

/// Configuration management.
pub mod config;
/// Typing delay scheduling.
pub mod delay;
/// Administrative errors.
pub mod error;
/// Inbound webhook events.
pub mod event;
/// Language-model responder.
pub mod llm;
/// Per-user conversation sessions.
pub mod session;
/// Keyword-triggered media replies.
pub mod triggers;

pub use config::{RelaySettings, TuningSnapshot, FALLBACK_REPLY};
pub use delay::{DelayConfig, DelayScheduler, DeliveryCategory};
pub use error::AdminError;
pub use event::{InboundEvent, WebhookPayload};
pub use llm::{LlmError, OpenAiResponder, Responder};
pub use session::{ContextTurn, Role, SessionStore};
pub use triggers::{MediaDescriptor, MediaKind, Trigger, TriggerMatcher};
