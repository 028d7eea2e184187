//! Cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag polled by every stage at its suspension points.
///
/// The caller owns the token and resets it before starting a new
/// operation; the engine only ever reads it.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running operation to stop at its next poll boundary
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag. Only the owner calls this, between operations.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
