//! Deferral primitives for the request driver.
//!
//! The driver never blocks; every observable step is separated from the
//! previous one by one of these awaits so callers get a chance to attach
//! listeners, abort, or write more data.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Defer to the next scheduling turn (after currently queued tasks).
pub async fn next_turn() {
    tokio::task::yield_now().await;
}

/// Defer for a single hop, used between buffered body chunks.
pub async fn immediate() {
    tokio::task::yield_now().await;
}

/// Sleep for `delay`, returning early if `cancel` fires.
///
/// Returns `true` when the full delay elapsed. A zero delay completes
/// without touching the timer wheel.
pub async fn timer(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
