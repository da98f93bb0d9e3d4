//! Waiter records and the capability set a synchronization point drives

use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Index value of a waiter that is not enqueued on any synchronization point
pub const NO_INDEX: usize = usize::MAX;

/// Outcome of one wait attempt
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitState {
    /// Fresh record, not yet handed to a synchronization point
    None,
    /// Enqueued and waiting for a trigger
    Waiting,
    /// Predicate held and the atomic action ran
    Complete,
    /// Removed by `cancel`
    Canceled,
    /// Removed because its deadline elapsed first
    TimedOut,
    /// The synchronization point was destroyed
    Destroyed,
}

impl WaitState {
    /// Whether the attempt has reached a final outcome
    pub fn is_resolved(self) -> bool {
        !matches!(self, WaitState::None | WaitState::Waiting)
    }

    /// Whether the attempt resolved successfully
    pub fn is_complete(self) -> bool {
        self == WaitState::Complete
    }
}

/// Bookkeeping for one wait attempt.
///
/// Both fields are written only while the owning synchronization point's
/// lock is held. `index` is `NO_INDEX` exactly when `state` is not `Waiting`.
#[derive(Debug)]
pub struct WaitRecord {
    index: AtomicUsize,
    state: AtomicCell<WaitState>,
}

impl WaitRecord {
    /// Create a record in the `None` state
    pub fn new() -> Self {
        Self {
            index: AtomicUsize::new(NO_INDEX),
            state: AtomicCell::new(WaitState::None),
        }
    }

    /// Position in the owning waiter list, or `NO_INDEX`
    pub fn index(&self) -> usize {
        self.index.load(Ordering::Acquire)
    }

    /// Current state
    pub fn state(&self) -> WaitState {
        self.state.load()
    }

    pub(crate) fn enqueue_at(&self, index: usize) {
        self.index.store(index, Ordering::Release);
        self.state.store(WaitState::Waiting);
    }

    pub(crate) fn move_to(&self, index: usize) {
        self.index.store(index, Ordering::Release);
    }

    pub(crate) fn resolve(&self, outcome: WaitState) {
        self.index.store(NO_INDEX, Ordering::Release);
        self.state.store(outcome);
    }
}

impl Default for WaitRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability set of anything that can wait on a `SyncPoint<T>`.
///
/// Every method except `record` is invoked with the synchronization point's
/// lock held, so none of them may block or touch the same point again.
/// The blocking or suspending half of the wait is performed by the waiter
/// itself after `SyncPoint::wait` returns `WaitState::Waiting`.
pub trait Waiter<T>: Send + Sync {
    /// The record the synchronization point maintains for this attempt
    fn record(&self) -> &WaitRecord;

    /// Pure query: may this waiter proceed given the protected state?
    fn test_predicate(&self, shared: &T) -> bool;

    /// Act on a satisfied predicate. Never invoked for a waiter that ends
    /// up canceled, timed out or destroyed.
    fn atomic_action(&self, shared: &mut T);

    /// Arm the suspension mechanism before the lock is released
    fn mark_for_suspend(&self);

    /// Release the suspension mechanism. Must not block.
    fn wake(&self);

    /// Called once when the attempt ends in `Canceled`, `TimedOut` or
    /// `Destroyed`, just before `wake`
    fn on_failure(&self, _outcome: WaitState) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_starts_unqueued() {
        let record = WaitRecord::new();
        assert_eq!(record.index(), NO_INDEX);
        assert_eq!(record.state(), WaitState::None);
    }

    #[test]
    fn test_record_enqueue_and_resolve() {
        let record = WaitRecord::new();
        record.enqueue_at(3);
        assert_eq!(record.index(), 3);
        assert_eq!(record.state(), WaitState::Waiting);

        record.resolve(WaitState::Canceled);
        assert_eq!(record.index(), NO_INDEX);
        assert_eq!(record.state(), WaitState::Canceled);
    }

    #[test]
    fn test_wait_state_classification() {
        assert!(!WaitState::None.is_resolved());
        assert!(!WaitState::Waiting.is_resolved());
        assert!(WaitState::Complete.is_resolved());
        assert!(WaitState::TimedOut.is_resolved());
        assert!(WaitState::Complete.is_complete());
        assert!(!WaitState::Destroyed.is_complete());
    }
}
