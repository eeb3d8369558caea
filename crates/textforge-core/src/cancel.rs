//! Cooperative cancellation tokens.
//!
//! Background work (workspace search, analyzer requests, highlight passes
//! driven off-thread) is cancelled cooperatively: the task holds a clone of a
//! [`CancelToken`] and checks it at its own suspension points: between files
//! in a search, between dispatch chunks in analysis. Cancellation never
//! interrupts a partially-applied buffer edit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cheaply clonable cancellation flag shared between a task and its owner.
///
/// All clones observe the same flag; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, non-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
