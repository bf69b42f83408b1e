//! Cooperative cancellation for decode work.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared flag that tells in-flight decode work to stop.
///
/// Clones share the same underlying state, so cancelling one clone is
/// observed by all of them. Workers check the token between the expensive
/// steps of a job and bail out early once it is set.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the non-cancelled state.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancels the token. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether `cancel` has been called on this token or any clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
