//! Process-wide monotonic sequences

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of event, problem and action ids.
///
/// Every call returns a value strictly greater than any previous one from
/// the same generator, across all entities.
pub trait SequenceGenerator: Send + Sync + std::fmt::Debug {
    fn next_event_id(&self) -> u64;
    fn next_problem_id(&self) -> u64;
    fn next_action_id(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct AtomicSequence {
    event: AtomicU64,
    problem: AtomicU64,
    action: AtomicU64,
}

impl AtomicSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume after previously issued ids
    pub fn starting_at(event: u64, problem: u64, action: u64) -> Self {
        Self {
            event: AtomicU64::new(event),
            problem: AtomicU64::new(problem),
            action: AtomicU64::new(action),
        }
    }
}

impl SequenceGenerator for AtomicSequence {
    fn next_event_id(&self) -> u64 {
        self.event.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn next_problem_id(&self) -> u64 {
        self.problem.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn next_action_id(&self) -> u64 {
        self.action.fetch_add(1, Ordering::SeqCst) + 1
    }
}
