//! Errors raised by administrative operations on shared tables.

use thiserror::Error;

/// Rejection of an administrative change; the active table stays untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// A required field was empty or missing
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    /// A trigger with the same name is already active
    #[error("Trigger already exists: {0}")]
    DuplicateTrigger(String),
    /// A numeric tuning value was out of range
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}
