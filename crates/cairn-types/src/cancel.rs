use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error returned when an operation observes a cancelled token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Cooperative cancellation signal shared between a caller and an operation.
///
/// Cloning is cheap; all clones observe the same flag. Operations check the
/// token at their boundaries (before I/O, between appended nodes, per file
/// during tree walks) rather than mid-syscall, so cancellation is prompt but
/// never leaves a half-written durable record: a cancelled flush simply never
/// publishes its ref.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` if the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns `Err(Cancelled)` if the token has been cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
