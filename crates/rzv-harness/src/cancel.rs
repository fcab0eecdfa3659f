//! Cooperative stop signal shared by the scheduler and its workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Once cancelled, loops that poll the token stop issuing new work; whatever
/// comparison is already running finishes normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
