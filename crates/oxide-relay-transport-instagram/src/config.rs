//! Instagram transport settings.

use config::ConfigError;
use oxide_relay_core::RelaySettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Instagram transport settings loaded from config files and environment variables.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InstagramSettings {
    /// Page access token for the Graph API.
    #[serde(default)]
    pub instagram_access_token: Option<String>,
    /// Page id (informational).
    #[serde(default)]
    pub instagram_page_id: Option<String>,
    /// Graph API version segment, e.g. `v21.0`.
    #[serde(default = "default_api_version")]
    pub instagram_api_version: String,
    /// Graph API host.
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
    /// Token expected during webhook verification.
    #[serde(default)]
    pub webhook_verify_token: Option<String>,
    /// Listen address of the HTTP server.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Bearer token guarding admin routes; open when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_api_version() -> String {
    "v21.0".to_string()
}

fn default_graph_base_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for InstagramSettings {
    fn default() -> Self {
        Self {
            instagram_access_token: None,
            instagram_page_id: None,
            instagram_api_version: default_api_version(),
            graph_base_url: default_graph_base_url(),
            webhook_verify_token: None,
            bind_addr: default_bind_addr(),
            admin_token: None,
        }
    }
}

impl InstagramSettings {
    /// Create new settings by loading from environment and files.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        oxide_relay_core::config::build_config()?.try_deserialize()
    }

    /// Names of required credentials that are missing or blank.
    #[must_use]
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(self.instagram_access_token.as_deref()) {
            missing.push("instagram_access_token");
        }
        if is_blank(self.webhook_verify_token.as_deref()) {
            missing.push("webhook_verify_token");
        }
        missing
    }

    /// Messages endpoint of the configured Graph API version.
    #[must_use]
    pub fn messages_url(&self) -> String {
        format!(
            "{}/{}/me/messages",
            self.graph_base_url.trim_end_matches('/'),
            self.instagram_api_version
        )
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Combined settings used by the Instagram transport layer.
#[derive(Clone)]
pub struct ServerSettings {
    /// Relay settings shared with the pipeline.
    pub relay: Arc<RelaySettings>,
    /// Instagram-specific settings.
    pub instagram: Arc<InstagramSettings>,
}

impl ServerSettings {
    /// Create a new combined settings bundle.
    #[must_use]
    pub fn new(relay: RelaySettings, instagram: InstagramSettings) -> Self {
        Self {
            relay: Arc::new(relay),
            instagram: Arc::new(instagram),
        }
    }
}
