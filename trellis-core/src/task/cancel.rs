//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::TaskError;

/// Shared cancellation flag of one task run.
///
/// Cancelling never interrupts anything. Work functions poll
/// [`check`](Self::check) at points where stopping is safe.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Once set, the flag stays set for this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(TaskError::Cancelled)` once cancellation was requested.
    ///
    /// ```rust,ignore
    /// for epoch in 0..100 {
    ///     task.check_cancelled()?;
    ///     progress.set(task.session(), epoch);
    /// }
    /// ```
    pub fn check(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(observer.check().is_ok());

        token.cancel();
        assert!(observer.is_cancelled());
        assert!(matches!(observer.check(), Err(TaskError::Cancelled)));
    }

    #[test]
    fn fresh_tokens_are_independent() {
        let first = CancellationToken::new();
        first.cancel();
        assert!(!CancellationToken::new().is_cancelled());
    }
}
