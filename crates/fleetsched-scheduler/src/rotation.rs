//! Rotating start index for node evaluation.
//!
//! Each cycle starts filtering where the previous one stopped, so
//! consecutive cycles look at different nodes first.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct NodeRotation {
    next_start: AtomicUsize,
}

impl NodeRotation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start index into a list of `count` nodes. `None` if empty.
    pub fn start(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        Some(self.next_start.load(Ordering::Relaxed) % count)
    }

    /// Move past the `processed` nodes examined this cycle.
    pub fn advance(&self, processed: usize, count: usize) {
        if count == 0 {
            return;
        }
        let current = self.next_start.load(Ordering::Relaxed);
        self.next_start
            .store((current + processed) % count, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.next_start.store(0, Ordering::Relaxed);
    }

    /// Current raw value (for diagnostics).
    pub fn current(&self) -> usize {
        self.next_start.load(Ordering::Relaxed)
    }
}
