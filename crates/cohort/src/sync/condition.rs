//! Binary latch with manual or automatic reset

use crate::sync::point::SyncPoint;
use crate::sync::wait::{ParkedWaiter, WaitFuture, WaitPolicy};
use crate::sync::waiter::WaitState;
use std::time::{Duration, Instant};

/// What happens to the latch when a waiter passes it
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ResetMode {
    /// Stays triggered until `reset` is called; a trigger releases everyone
    #[default]
    Manual,
    /// Each trigger lets exactly one waiter through, then clears itself
    Auto,
}

/// Pass policy of a latch waiter
#[derive(Debug, Copy, Clone)]
pub struct Latch {
    mode: ResetMode,
}

impl Latch {
    pub(crate) fn new(mode: ResetMode) -> Self {
        Self { mode }
    }
}

impl WaitPolicy<bool> for Latch {
    fn test(&self, triggered: &bool) -> bool {
        *triggered
    }

    fn act(&self, triggered: &mut bool) {
        if self.mode == ResetMode::Auto {
            *triggered = false;
        }
    }

    fn undo(&self, triggered: &mut bool) -> usize {
        if self.mode == ResetMode::Auto {
            *triggered = true;
            1
        } else {
            0
        }
    }
}

/// A latch that waiters pass once it has been triggered
pub struct Condition {
    point: SyncPoint<bool>,
    mode: ResetMode,
}

impl Condition {
    /// Create an untriggered manual-reset condition
    pub fn new() -> Self {
        Self::with_mode(ResetMode::Manual)
    }

    /// Create an untriggered condition with the given reset mode
    pub fn with_mode(mode: ResetMode) -> Self {
        Self {
            point: SyncPoint::new(false),
            mode,
        }
    }

    /// Reset mode chosen at construction
    pub fn mode(&self) -> ResetMode {
        self.mode
    }

    /// Set the latch and release waiters
    pub fn trigger(&self) -> usize {
        self.point.trigger(|triggered| *triggered = true)
    }

    /// Clear the latch
    pub fn reset(&self) {
        self.point.trigger(|triggered| {
            *triggered = false;
            false
        });
    }

    /// Check if the latch is set
    pub fn is_triggered(&self) -> bool {
        self.point.with_shared(|triggered| *triggered)
    }

    /// Block the calling thread until triggered.
    ///
    /// Returns `WaitState::Complete`, or `WaitState::Destroyed` if the
    /// condition was destroyed before it could be passed.
    pub fn wait(&self) -> WaitState {
        let waiter = ParkedWaiter::new(Latch::new(self.mode));
        self.point.block(&waiter)
    }

    /// Block the calling thread until triggered or `timeout` elapses.
    ///
    /// Returns whether the latch was passed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_deadline(Instant::now() + timeout)
    }

    /// Block the calling thread until triggered or `deadline` passes
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        let waiter = ParkedWaiter::new(Latch::new(self.mode));
        self.point.block_until(&waiter, deadline) == WaitState::Complete
    }

    /// Suspend the current task until triggered
    pub fn wait_async(&self) -> WaitFuture<'_, bool, Latch> {
        self.point.suspend(Latch::new(self.mode))
    }

    /// Get number of waiting threads and tasks
    pub fn waiting_count(&self) -> usize {
        self.point.waiter_count()
    }

    /// Trigger, then destroy. Later waits resolve as `Destroyed`.
    pub fn destroy(&self) {
        self.trigger();
        self.point.destroy();
    }

    /// Destroy without triggering: queued waiters resolve as `Destroyed`
    pub(crate) fn abandon(&self) -> usize {
        self.point.destroy()
    }

    pub(crate) fn point(&self) -> &SyncPoint<bool> {
        &self.point
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Condition {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition")
            .field("mode", &self.mode)
            .field("triggered", &self.is_triggered())
            .field("waiting", &self.waiting_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_condition_fast_path() {
        let condition = Condition::new();
        condition.trigger();
        assert!(condition.is_triggered());
        assert_eq!(condition.wait(), WaitState::Complete);
        // Manual reset keeps it set
        assert!(condition.is_triggered());
    }

    #[test]
    fn test_condition_releases_all_waiters() {
        let condition = Arc::new(Condition::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let condition = condition.clone();
                thread::spawn(move || condition.wait())
            })
            .collect();

        while condition.waiting_count() < 4 {
            thread::yield_now();
        }
        assert_eq!(condition.trigger(), 4);
        for handle in handles {
            assert_eq!(handle.join().unwrap(), WaitState::Complete);
        }
    }

    #[test]
    fn test_condition_reset() {
        let condition = Condition::new();
        condition.trigger();
        condition.reset();
        assert!(!condition.is_triggered());
        assert!(!condition.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_condition_timeout_leaves_no_waiter() {
        let condition = Condition::new();
        assert!(!condition.wait_timeout(Duration::from_millis(20)));
        assert_eq!(condition.waiting_count(), 0);
    }

    #[test]
    fn test_condition_auto_reset_passes_one() {
        let condition = Arc::new(Condition::with_mode(ResetMode::Auto));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let condition = condition.clone();
                thread::spawn(move || condition.wait_timeout(Duration::from_millis(300)))
            })
            .collect();

        while condition.waiting_count() < 3 {
            thread::yield_now();
        }
        assert_eq!(condition.trigger(), 1);
        assert!(!condition.is_triggered());

        let passed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|passed| *passed)
            .count();
        assert_eq!(passed, 1);
    }

    #[test]
    fn test_condition_destroy_releases_waiters() {
        let condition = Arc::new(Condition::new());
        let waiter = {
            let condition = condition.clone();
            thread::spawn(move || condition.wait())
        };
        while condition.waiting_count() == 0 {
            thread::yield_now();
        }
        condition.destroy();
        assert_eq!(waiter.join().unwrap(), WaitState::Complete);
        assert_eq!(condition.wait(), WaitState::Destroyed);
    }
}
