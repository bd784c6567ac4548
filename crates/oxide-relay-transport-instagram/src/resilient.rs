//! Retry wrapper for Graph API calls.
//!
//! Transient failures (network errors, 429, 5xx) are retried with
//! exponential backoff and jitter. Client errors are returned immediately.

use oxide_relay_runtime::TransportError;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

/// Retries after the first attempt.
pub const GRAPH_API_MAX_RETRIES: usize = 3;
/// Base of the exponential backoff in milliseconds.
pub const GRAPH_API_INITIAL_BACKOFF_MS: u64 = 100;
/// Upper bound of a single backoff step in milliseconds.
pub const GRAPH_API_MAX_BACKOFF_MS: u64 = 2_000;

/// Run `operation`, retrying transient `TransportError`s.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-transient error.
pub async fn retry_graph_operation<F, Fut, T>(operation: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(GRAPH_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(GRAPH_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(GRAPH_API_MAX_RETRIES);

    RetryIf::spawn(retry_strategy, operation, TransportError::is_transient)
        .await
        .map_err(|e| {
            if e.is_transient() {
                warn!(
                    attempts = GRAPH_API_MAX_RETRIES + 1,
                    error = %e,
                    "Graph API operation failed after retries"
                );
            }
            e
        })
}
