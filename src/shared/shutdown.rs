use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide cooperative shutdown flag.
///
/// Loops re-check it between attempts; nothing is interrupted mid-call.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the caller that flipped the flag.
    pub fn trigger(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
