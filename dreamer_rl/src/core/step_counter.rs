//! Global training step counter.
//!
//! Schedules (`actor_ent`, `actor_grad_mix`, learning rates) are pure
//! functions of the step. The orchestrator owns the counter and advances it;
//! every other component holds a cloned handle and only reads it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared, monotonically increasing step counter.
///
/// Cloning yields another handle to the same count.
#[derive(Debug, Clone, Default)]
pub struct StepCounter {
    step: Arc<AtomicU64>,
}

impl StepCounter {
    /// Create a new counter starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a counter starting at `step`.
    pub fn starting_at(step: u64) -> Self {
        Self {
            step: Arc::new(AtomicU64::new(step)),
        }
    }

    /// Current step.
    pub fn get(&self) -> u64 {
        self.step.load(Ordering::SeqCst)
    }

    /// Advance by `n` and return the new step.
    pub fn advance(&self, n: u64) -> u64 {
        self.step.fetch_add(n, Ordering::SeqCst) + n
    }

    /// Advance by one and return the new step.
    pub fn increment(&self) -> u64 {
        self.advance(1)
    }
}
