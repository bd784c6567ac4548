//! Human-like typing delays.
//!
//! Delays are bounded to `[MIN_DELAY_SECS, max_seconds]`. The tuning record is
//! swapped as a whole, so an in-flight computation always uses one consistent
//! `DelayConfig`.

use crate::error::AdminError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Lower bound of every delay, and the fixed delay for non-text deliveries.
pub const MIN_DELAY_SECS: f64 = 0.5;

/// Word count at or below which the short acknowledgement formula applies.
const SHORT_MESSAGE_WORDS: usize = 3;
const SHORT_BASE_SECS: f64 = 0.8;
const SHORT_PER_WORD_SECS: f64 = 0.2;

/// What is being delivered; only text simulates typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryCategory {
    /// Plain text reply
    Text,
    /// Image or other attachment
    Media,
    /// Audio/voice attachment
    Voice,
}

/// Typing delay tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Base delay in seconds
    pub base_seconds: f64,
    /// Additional seconds per word
    pub per_word_seconds: f64,
    /// Upper bound in seconds
    pub max_seconds: f64,
    /// Jitter fraction; the delay is scaled by a factor in `[1 - jitter, 1 + jitter]`
    #[serde(alias = "randomness_factor")]
    pub jitter: f64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            base_seconds: 1.0,
            per_word_seconds: 0.15,
            max_seconds: 5.0,
            jitter: 0.3,
        }
    }
}

impl DelayConfig {
    /// Check that the tuning produces sane delays.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::InvalidValue` for negative or non-finite values,
    /// a jitter outside `[0, 1)`, or a maximum below `MIN_DELAY_SECS`.
    pub fn validate(&self) -> Result<(), AdminError> {
        let fields = [
            ("base_seconds", self.base_seconds),
            ("per_word_seconds", self.per_word_seconds),
            ("max_seconds", self.max_seconds),
            ("jitter", self.jitter),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(AdminError::InvalidValue {
                    field,
                    reason: format!("must be a non-negative number, got {value}"),
                });
            }
        }
        if self.jitter >= 1.0 {
            return Err(AdminError::InvalidValue {
                field: "jitter",
                reason: format!("must be below 1.0, got {}", self.jitter),
            });
        }
        if self.max_seconds < MIN_DELAY_SECS {
            return Err(AdminError::InvalidValue {
                field: "max_seconds",
                reason: format!("must be at least {MIN_DELAY_SECS}, got {}", self.max_seconds),
            });
        }
        Ok(())
    }

    /// Delay before jitter, already clamped to `max_seconds`.
    #[must_use]
    pub fn base_delay(&self, text: &str) -> f64 {
        let words = text.split_whitespace().count();
        #[allow(clippy::cast_precision_loss)]
        let w = words as f64;

        let base = if words <= SHORT_MESSAGE_WORDS {
            SHORT_BASE_SECS + SHORT_PER_WORD_SECS * w
        } else {
            self.base_seconds + w * self.per_word_seconds
        };
        base.min(self.max_seconds)
    }
}

/// Computes release delays from the active `DelayConfig`.
#[derive(Debug, Default)]
pub struct DelayScheduler {
    config: RwLock<Arc<DelayConfig>>,
}

impl DelayScheduler {
    /// Create a scheduler with validated tuning.
    ///
    /// # Errors
    ///
    /// Returns `AdminError` if the tuning is invalid.
    pub fn new(config: DelayConfig) -> Result<Self, AdminError> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(Arc::new(config)),
        })
    }

    /// Active tuning.
    #[must_use]
    pub fn config(&self) -> Arc<DelayConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in new tuning; visible to the next `compute` call.
    ///
    /// # Errors
    ///
    /// Returns `AdminError` if the tuning is invalid; the active tuning is kept.
    pub fn update_config(&self, config: DelayConfig) -> Result<(), AdminError> {
        config.validate()?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        info!(?config, "Updated typing delay tuning");
        Ok(())
    }

    /// Delay in seconds for delivering `text`, using thread-local randomness.
    #[must_use]
    pub fn compute(&self, text: &str, category: DeliveryCategory) -> f64 {
        self.compute_with(&mut rand::thread_rng(), text, category)
    }

    /// Delay in seconds for delivering `text`, drawing jitter from `rng`.
    pub fn compute_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        text: &str,
        category: DeliveryCategory,
    ) -> f64 {
        if category != DeliveryCategory::Text {
            return MIN_DELAY_SECS;
        }

        let config = self.config();
        let base = config.base_delay(text);
        let factor = if config.jitter > 0.0 {
            rng.gen_range((1.0 - config.jitter)..=(1.0 + config.jitter))
        } else {
            1.0
        };

        let delay = (base * factor).max(MIN_DELAY_SECS).min(config.max_seconds);
        debug!(delay, base, "Calculated typing delay");
        delay
    }

    /// Short "thinking" pause in `[0.5, 1.5]` seconds.
    #[must_use]
    pub fn pause_delay(&self) -> f64 {
        rand::thread_rng().gen_range(0.5..=1.5)
    }
}
