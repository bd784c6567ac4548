//! `OpenAI` chat-completions responder.

use super::common::{build_openai_messages, extract_reply};
use super::{LlmError, Responder};
use crate::config::RelaySettings;
use crate::session::ContextTurn;
use async_openai::{config::OpenAIConfig, types::chat::CreateChatCompletionRequestArgs, Client};
use async_trait::async_trait;
use tracing::{debug, info};

const PRESENCE_PENALTY: f32 = 0.6;
const FREQUENCY_PENALTY: f32 = 0.3;

/// Responder backed by an OpenAI-compatible chat-completions API.
pub struct OpenAiResponder {
    client: Option<Client<OpenAIConfig>>,
    model: String,
    system_prompt: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiResponder {
    /// Build a responder from settings. Without an API key every call fails
    /// with `LlmError::MissingConfig`.
    #[must_use]
    pub fn new(settings: &RelaySettings) -> Self {
        let client = settings
            .openai_api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(|key| {
                let mut config = OpenAIConfig::new().with_api_key(key);
                if let Some(base) = settings.openai_base_url.as_deref() {
                    config = config.with_api_base(base);
                }
                Client::with_config(config)
            });

        Self {
            client,
            model: settings.openai_model.clone(),
            system_prompt: settings.system_prompt.clone(),
            max_tokens: settings.openai_max_tokens,
            temperature: settings.openai_temperature,
        }
    }

    /// Whether an API key was configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    async fn generate(
        &self,
        user_message: &str,
        history: &[ContextTurn],
    ) -> Result<String, LlmError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| LlmError::MissingConfig("openai_api_key".to_string()))?;

        let messages = build_openai_messages(&self.system_prompt, history, user_message)?;
        debug!(model = %self.model, history = history.len(), "Requesting chat completion");

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .presence_penalty(PRESENCE_PENALTY)
            .frequency_penalty(FREQUENCY_PENALTY)
            .build()
            .map_err(|e| LlmError::Unknown(e.to_string()))?;

        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        let reply = extract_reply(&response)?;
        info!(preview = %reply.chars().take(50).collect::<String>(), "Generated response");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let responder = OpenAiResponder::new(&RelaySettings::default());
        assert!(!responder.is_configured());

        let result = responder.generate("hi", &[]).await;
        assert!(matches!(result, Err(LlmError::MissingConfig(_))));
    }

    #[test]
    fn test_empty_key_counts_as_missing() {
        let settings = RelaySettings {
            openai_api_key: Some(String::new()),
            ..RelaySettings::default()
        };
        assert!(!OpenAiResponder::new(&settings).is_configured());
    }
}
