//! Cancellation-aware waiting.

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// The wait was cancelled before the operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Race `fut` against an optional cancellation token.
///
/// Whichever branch loses is dropped. A token that is already cancelled wins
/// even if `fut` would complete immediately.
pub async fn race_cancel<F>(
    fut: F,
    token: Option<&CancellationToken>,
) -> std::result::Result<F::Output, Cancelled>
where
    F: Future,
{
    match token {
        None => Ok(fut.await),
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(Cancelled),
                out = fut => Ok(out),
            }
        }
    }
}
