//! Language-model responder
//!
//! The pipeline only sees the [`Responder`] trait; [`OpenAiResponder`] is the
//! production implementation backed by `async-openai`.

mod common;
mod openai;

pub use openai::OpenAiResponder;

use crate::session::ContextTurn;
use thiserror::Error;

/// Errors that can occur while generating a reply
#[derive(Debug, Error)]
pub enum LlmError {
    /// Error returned by the provider's API
    #[error("API error: {0}")]
    ApiError(String),
    /// Missing provider configuration or API key
    #[error("Missing client/API key: {0}")]
    MissingConfig(String),
    /// The call did not finish in time
    #[error("Responder timed out after {0}s")]
    Timeout(u64),
    /// Any other unexpected error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Turns a user message plus prior context into reply text.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait::async_trait]
pub trait Responder: Send + Sync {
    /// Generate a reply to `user_message` given `history` (oldest first,
    /// excluding `user_message` itself).
    async fn generate(
        &self,
        user_message: &str,
        history: &[ContextTurn],
    ) -> Result<String, LlmError>;
}
