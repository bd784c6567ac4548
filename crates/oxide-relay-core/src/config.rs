//! Configuration and settings management
//!
//! Loads relay settings from config files and environment variables.

use crate::delay::DelayConfig;
use crate::triggers::Trigger;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default system prompt for the responder
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly and helpful assistant for an Instagram account. \
You communicate naturally like a real human being. Be conversational, warm, and engaging. \
Keep responses concise but meaningful. Use casual language and emojis when appropriate. \
Always maintain a helpful and positive tone.";

/// Reply used whenever the responder fails or times out
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I'm having trouble processing that right now. Could you try again?";

/// Relay settings loaded from config files and environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelaySettings {
    /// `OpenAI` API key
    pub openai_api_key: Option<String>,
    /// Chat model identifier
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    /// Optional override of the `OpenAI` API base URL (compatible providers)
    pub openai_base_url: Option<String>,
    /// System prompt sent ahead of every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Maximum output tokens per reply
    #[serde(default = "default_openai_max_tokens")]
    pub openai_max_tokens: u32,
    /// Sampling temperature
    #[serde(default = "default_openai_temperature")]
    pub openai_temperature: f32,

    /// Idle minutes before a session is dropped
    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: u64,
    /// Maximum turns kept per session
    #[serde(default = "default_session_max_messages")]
    pub session_max_messages: usize,
    /// Number of prior turns handed to the responder
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,

    /// Base typing delay in seconds
    #[serde(default = "default_typing_base_seconds")]
    pub typing_base_seconds: f64,
    /// Additional typing delay per word
    #[serde(default = "default_typing_per_word_seconds")]
    pub typing_per_word_seconds: f64,
    /// Upper bound of the typing delay
    #[serde(default = "default_typing_max_seconds")]
    pub typing_max_seconds: f64,
    /// Jitter fraction applied to the typing delay
    #[serde(default = "default_typing_randomness")]
    pub typing_randomness: f64,

    /// Keyword-triggered media replies
    #[serde(default)]
    pub media_triggers: Vec<Trigger>,

    /// Whether platform delivery actually waits out the typing delay
    #[serde(default = "default_true")]
    pub simulate_wait: bool,
    /// Upper bound of concurrently running message pipelines
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Upper bound of registered pipelines, running or waiting for a slot
    #[serde(default = "default_max_pending_tasks")]
    pub max_pending_tasks: usize,
    /// Timeout applied to every responder/transport call
    #[serde(default = "default_collaborator_timeout_secs")]
    pub collaborator_timeout_secs: u64,
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

const fn default_openai_max_tokens() -> u32 {
    150
}

const fn default_openai_temperature() -> f32 {
    0.8
}

const fn default_session_timeout_minutes() -> u64 {
    30
}

const fn default_session_max_messages() -> usize {
    20
}

const fn default_context_turns() -> usize {
    10
}

const fn default_typing_base_seconds() -> f64 {
    1.0
}

const fn default_typing_per_word_seconds() -> f64 {
    0.15
}

const fn default_typing_max_seconds() -> f64 {
    5.0
}

const fn default_typing_randomness() -> f64 {
    0.3
}

const fn default_true() -> bool {
    true
}

const fn default_max_concurrent_tasks() -> usize {
    64
}

const fn default_max_pending_tasks() -> usize {
    1024
}

const fn default_collaborator_timeout_secs() -> u64 {
    30
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: default_openai_model(),
            openai_base_url: None,
            system_prompt: default_system_prompt(),
            openai_max_tokens: default_openai_max_tokens(),
            openai_temperature: default_openai_temperature(),
            session_timeout_minutes: default_session_timeout_minutes(),
            session_max_messages: default_session_max_messages(),
            context_turns: default_context_turns(),
            typing_base_seconds: default_typing_base_seconds(),
            typing_per_word_seconds: default_typing_per_word_seconds(),
            typing_max_seconds: default_typing_max_seconds(),
            typing_randomness: default_typing_randomness(),
            media_triggers: Vec::new(),
            simulate_wait: true,
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_pending_tasks: default_max_pending_tasks(),
            collaborator_timeout_secs: default_collaborator_timeout_secs(),
        }
    }
}

/// Build the layered configuration shared by every settings struct.
///
/// Sources, later ones overriding earlier ones: `config/default`,
/// `config/{RUN_MODE}`, `config/local`, `APP__*` variables, plain variables.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // UPPER_SNAKE_CASE maps to snake_case; empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl RelaySettings {
    /// Load settings from config files and the environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Typing delay tuning assembled from the flat settings.
    #[must_use]
    pub fn delay_config(&self) -> DelayConfig {
        DelayConfig {
            base_seconds: self.typing_base_seconds,
            per_word_seconds: self.typing_per_word_seconds,
            max_seconds: self.typing_max_seconds,
            jitter: self.typing_randomness,
        }
    }

    /// Idle timeout after which a session expires.
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_minutes.saturating_mul(60))
    }

    /// Timeout applied to each collaborator call.
    #[must_use]
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }
}

/// Administrative tuning that can be exported and re-imported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningSnapshot {
    /// Active trigger table, in match order
    #[serde(default)]
    pub media_triggers: Vec<Trigger>,
    /// Active typing delay tuning
    pub typing_delay: DelayConfig,
}

impl TuningSnapshot {
    /// Serialize the snapshot as YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Parse a snapshot from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid snapshot.
    pub fn from_yaml(input: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::MediaKind;

    #[test]
    fn test_defaults_match_documented_values() {
        let settings = RelaySettings::default();
        assert_eq!(settings.openai_model, "gpt-4o-mini");
        assert_eq!(settings.session_max_messages, 20);
        assert_eq!(settings.session_timeout(), Duration::from_secs(30 * 60));
        assert!(settings.simulate_wait);
        assert_eq!(settings.max_concurrent_tasks, 64);
        assert_eq!(settings.max_pending_tasks, 1024);

        let delay = settings.delay_config();
        assert!((delay.base_seconds - 1.0).abs() < f64::EPSILON);
        assert!((delay.per_word_seconds - 0.15).abs() < f64::EPSILON);
        assert!((delay.max_seconds - 5.0).abs() < f64::EPSILON);
        assert!((delay.jitter - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_triggers_deserialize_from_config_layout() -> Result<(), Box<dyn std::error::Error>> {
        let raw = r#"{
            "media_triggers": [
                {"name": "menu", "keywords": ["menu", "price"], "type": "image", "path": "https://cdn.example/menu.jpg"},
                {"name": "hello", "keywords": ["voice"], "type": "audio", "path": "https://cdn.example/hi.mp3"}
            ],
            "typing_max_seconds": 3.5
        }"#;

        let settings: RelaySettings = Config::builder()
            .add_source(File::from_str(raw, config::FileFormat::Json))
            .build()?
            .try_deserialize()?;

        assert_eq!(settings.media_triggers.len(), 2);
        assert_eq!(settings.media_triggers[0].kind, MediaKind::Image);
        assert_eq!(settings.media_triggers[1].reference, "https://cdn.example/hi.mp3");
        assert!((settings.delay_config().max_seconds - 3.5).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn test_snapshot_yaml_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let snapshot = TuningSnapshot {
            media_triggers: vec![Trigger {
                name: "photo".to_string(),
                keywords: vec!["photo".to_string(), "pic".to_string()],
                kind: MediaKind::Image,
                reference: "https://cdn.example/photo.jpg".to_string(),
            }],
            typing_delay: RelaySettings::default().delay_config(),
        };

        let yaml = snapshot.to_yaml()?;
        assert!(yaml.contains("type: image"));
        assert!(yaml.contains("path: https://cdn.example/photo.jpg"));
        assert_eq!(TuningSnapshot::from_yaml(&yaml)?, snapshot);
        Ok(())
    }
}
