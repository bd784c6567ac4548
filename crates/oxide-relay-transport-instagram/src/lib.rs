#![deny(missing_docs)]
//! Instagram transport adapter for Oxide Relay.

/// Instagram transport configuration.
pub mod config;
/// Graph API messaging client.
pub mod graph;
/// Retry helpers for Graph API calls.
pub mod resilient;
/// Instagram runtime entrypoint.
pub mod runner;
/// HTTP routes.
pub mod server;

pub use config::{InstagramSettings, ServerSettings};
pub use graph::GraphClient;
pub use runner::run_server;
