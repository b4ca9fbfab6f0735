use thiserror::Error;

/// Terminal condition of a capture loop that stopped because its
/// cancellation token fired. Not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("listener cancelled")]
pub struct Cancelled;

/// Returns true when `err` is (or wraps) [`Cancelled`].
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Cancelled>().is_some()
}
