//! Keyword-triggered media replies.
//!
//! The active trigger table is an immutable snapshot behind an `Arc`. Admin
//! operations build a new table and swap it in, so a concurrent match sees
//! either the old table or the new one, never a mix.

use crate::error::AdminError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Kind of media a trigger replies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Image attachment
    Image,
    /// Audio attachment
    Audio,
}

impl MediaKind {
    /// Attachment type name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A keyword rule mapping message text to a canned media reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Unique name within the active table
    pub name: String,
    /// Case-insensitive keywords, checked in order
    pub keywords: Vec<String>,
    /// Media kind sent when the trigger fires
    #[serde(rename = "type")]
    pub kind: MediaKind,
    /// URL or path of the media to send
    #[serde(rename = "path", alias = "reference")]
    pub reference: String,
}

impl Trigger {
    /// Check required fields.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::MissingField` for a blank name or reference, or
    /// when no keyword is non-blank.
    pub fn validate(&self) -> Result<(), AdminError> {
        if self.name.trim().is_empty() {
            return Err(AdminError::MissingField("name"));
        }
        if !self.keywords.iter().any(|k| !k.trim().is_empty()) {
            return Err(AdminError::MissingField("keywords"));
        }
        if self.reference.trim().is_empty() {
            return Err(AdminError::MissingField("path"));
        }
        Ok(())
    }

    /// First keyword of this trigger found in already lower-cased text.
    fn first_match(&self, lowered: &str) -> Option<&str> {
        self.keywords
            .iter()
            .map(String::as_str)
            .filter(|k| !k.is_empty())
            .find(|k| lowered.contains(&k.to_lowercase()))
    }
}

/// Media reply chosen for a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaDescriptor {
    /// Media kind
    pub kind: MediaKind,
    /// URL or path of the media
    pub reference: String,
    /// Name of the trigger that fired
    pub name: String,
}

/// Matches message text against the active trigger table.
#[derive(Debug, Default)]
pub struct TriggerMatcher {
    table: RwLock<Arc<Vec<Trigger>>>,
}

impl TriggerMatcher {
    /// Create a matcher from a validated table.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found, including duplicate names.
    pub fn new(triggers: Vec<Trigger>) -> Result<Self, AdminError> {
        validate_table(&triggers)?;
        Ok(Self {
            table: RwLock::new(Arc::new(triggers)),
        })
    }

    /// Current table snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Trigger>> {
        Arc::clone(&self.table.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Find the media reply for `text`, if any.
    ///
    /// Triggers are scanned in table order and each trigger's keywords in
    /// list order; the first trigger with any matching keyword wins.
    #[must_use]
    pub fn match_text(&self, text: &str) -> Option<MediaDescriptor> {
        let table = self.snapshot();
        let lowered = text.to_lowercase();

        table.iter().find_map(|trigger| {
            trigger.first_match(&lowered).map(|keyword| {
                info!(trigger = %trigger.name, keyword = %keyword, kind = %trigger.kind, "Keyword triggered media");
                MediaDescriptor {
                    kind: trigger.kind,
                    reference: trigger.reference.clone(),
                    name: trigger.name.clone(),
                }
            })
        })
    }

    /// Append a trigger to the end of the table.
    ///
    /// # Errors
    ///
    /// Returns `AdminError` if the trigger is invalid or its name is taken.
    pub fn add_trigger(&self, trigger: Trigger) -> Result<(), AdminError> {
        trigger.validate()?;
        let mut guard = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if guard.iter().any(|t| t.name == trigger.name) {
            return Err(AdminError::DuplicateTrigger(trigger.name));
        }

        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        info!(trigger = %trigger.name, "Added trigger");
        next.push(trigger);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Remove a trigger by name. Returns `true` if it was present.
    pub fn remove_trigger(&self, name: &str) -> bool {
        let mut guard = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|t| t.name == name) {
            debug!(trigger = %name, "Trigger not found for removal");
            return false;
        }

        let next: Vec<Trigger> = guard.iter().filter(|t| t.name != name).cloned().collect();
        *guard = Arc::new(next);
        info!(trigger = %name, "Removed trigger");
        true
    }

    /// Replace the whole table.
    ///
    /// # Errors
    ///
    /// Returns `AdminError` if any trigger is invalid; the active table is
    /// left unchanged in that case.
    pub fn replace_all(&self, triggers: Vec<Trigger>) -> Result<(), AdminError> {
        validate_table(&triggers)?;
        let count = triggers.len();
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(triggers);
        info!(count, "Replaced trigger table");
        Ok(())
    }
}

fn validate_table(triggers: &[Trigger]) -> Result<(), AdminError> {
    for (i, trigger) in triggers.iter().enumerate() {
        trigger.validate()?;
        if triggers[..i].iter().any(|t| t.name == trigger.name) {
            return Err(AdminError::DuplicateTrigger(trigger.name.clone()));
        }
    }
    Ok(())
}
