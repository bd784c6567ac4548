#![deny(missing_docs)]
//! Oxide Relay runtime.
//!
//! Transport-agnostic orchestration: the per-message pipeline, the in-flight
//! task registry and the outbound transport seam.

/// Per-message response pipeline.
pub mod orchestrator;
/// In-flight task registry.
pub mod task_registry;
/// Outbound messaging transport seam.
pub mod transport;

pub use orchestrator::{
    Orchestrator, OrchestratorConfig, PipelineOutcome, PipelineState, RelayState, RelayStats,
    RunOptions,
};
pub use task_registry::{RegistryFull, TaskKey, TaskRegistry};
pub use transport::{ChatTransport, TransportError, TypingState};
