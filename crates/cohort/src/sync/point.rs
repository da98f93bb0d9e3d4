//! Predicate-driven, FIFO-ordered multi-waiter synchronization point

use crate::sync::waiter::{WaitState, Waiter, NO_INDEX};
use parking_lot::Mutex;
use std::sync::Arc;

/// Selects the trigger form from the mutator's return type.
///
/// - `()` always scans with no wake limit
/// - `bool` scans with no wake limit only if `true`
/// - `usize` scans waking at most that many waiters
pub trait TriggerResult {
    /// `None` skips the scan, `Some(n)` wakes at most `n` waiters
    fn wake_limit(self) -> Option<usize>;
}

impl TriggerResult for () {
    fn wake_limit(self) -> Option<usize> {
        Some(usize::MAX)
    }
}

impl TriggerResult for bool {
    fn wake_limit(self) -> Option<usize> {
        self.then_some(usize::MAX)
    }
}

impl TriggerResult for usize {
    fn wake_limit(self) -> Option<usize> {
        Some(self)
    }
}

struct Inner<T> {
    shared: T,
    waiters: Vec<Arc<dyn Waiter<T>>>,
    destroyed: bool,
}

/// A mutex-protected shared state `T` with an ordered list of waiters.
///
/// Waiters are kept in arrival order. Every trigger scans them front to
/// back and resolves those whose predicate holds, so waiters made eligible by
/// the same trigger resolve in FIFO order and the survivors keep their
/// relative order.
pub struct SyncPoint<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> SyncPoint<T> {
    /// Create a synchronization point protecting `shared`
    pub fn new(shared: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                shared,
                waiters: Vec::new(),
                destroyed: false,
            }),
        }
    }

    /// Begin a wait attempt.
    ///
    /// Returns `Complete` if the predicate already held (the atomic action has
    /// run and the caller must not suspend), `Destroyed` if the point is gone,
    /// and `Waiting` if the waiter was enqueued and armed. Only in the last
    /// case does the caller go on to block or suspend.
    pub fn wait<W>(&self, waiter: &Arc<W>) -> WaitState
    where
        W: Waiter<T> + 'static,
    {
        let record = waiter.record();
        debug_assert_eq!(record.state(), WaitState::None, "waiter record reused");

        let mut inner = self.inner.lock();
        if inner.destroyed {
            record.resolve(WaitState::Destroyed);
            return WaitState::Destroyed;
        }

        if waiter.test_predicate(&inner.shared) {
            waiter.atomic_action(&mut inner.shared);
            record.resolve(WaitState::Complete);
            return WaitState::Complete;
        }

        let index = inner.waiters.len();
        record.enqueue_at(index);
        inner.waiters.push(waiter.clone() as Arc<dyn Waiter<T>>);
        waiter.mark_for_suspend();
        WaitState::Waiting
    }

    /// Cancel a waiting attempt.
    ///
    /// Returns `false` without effect if the waiter already resolved.
    pub fn cancel<W>(&self, waiter: &W) -> bool
    where
        W: Waiter<T> + ?Sized,
    {
        self.cancel_with(waiter, WaitState::Canceled)
    }

    /// Cancel a waiting attempt, resolving it with `outcome`
    /// (`Canceled` or `TimedOut`)
    pub fn cancel_with<W>(&self, waiter: &W, outcome: WaitState) -> bool
    where
        W: Waiter<T> + ?Sized,
    {
        debug_assert!(matches!(outcome, WaitState::Canceled | WaitState::TimedOut));

        let record = waiter.record();
        let mut inner = self.inner.lock();

        let index = record.index();
        if index == NO_INDEX || index >= inner.waiters.len() {
            return false;
        }
        if !std::ptr::eq(inner.waiters[index].record(), record) {
            return false;
        }

        let removed = inner.waiters.remove(index);
        for (position, later) in inner.waiters.iter().enumerate().skip(index) {
            later.record().move_to(position);
        }

        record.resolve(outcome);
        removed.on_failure(outcome);
        removed.wake();
        true
    }

    /// Mutate the shared state, then wake waiters whose predicate now holds.
    ///
    /// The mutator's return type picks the scan policy (see
    /// [`TriggerResult`]). Returns the number of waiters woken.
    pub fn trigger<R, F>(&self, mutator: F) -> usize
    where
        R: TriggerResult,
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let limit = match mutator(&mut inner.shared).wake_limit() {
            Some(limit) if limit > 0 && !inner.waiters.is_empty() => limit,
            _ => return 0,
        };

        Self::scan(inner, limit)
    }

    /// Run `action` on the shared state, then wake every waiter whose
    /// predicate now holds. Returns the action's result.
    pub fn modify<R>(&self, action: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let result = action(&mut inner.shared);
        if !inner.waiters.is_empty() {
            Self::scan(inner, usize::MAX);
        }
        result
    }

    fn scan(inner: &mut Inner<T>, limit: usize) -> usize {
        let Inner { shared, waiters, .. } = inner;
        let mut waiters = Renumber(waiters);
        let mut woken = 0;

        // A panicking predicate or action leaves its waiter and every unvisited
        // one queued; `Renumber` restores their indices on the way out
        waiters.0.retain(|waiter| {
            if woken >= limit || !waiter.test_predicate(shared) {
                return true;
            }
            waiter.atomic_action(shared);
            waiter.record().resolve(WaitState::Complete);
            waiter.wake();
            woken += 1;
            false
        });

        woken
    }

    /// Destroy the point, resolving every queued waiter with `Destroyed`.
    ///
    /// Idempotent; returns the number of waiters released by this call.
    pub fn destroy(&self) -> usize {
        let mut inner = self.inner.lock();
        Self::release_all(&mut inner)
    }

    /// Destroy the point only if `allow` accepts the shared state, checked
    /// under the same lock. Returns `None` if refused.
    pub fn destroy_if(&self, allow: impl FnOnce(&T) -> bool) -> Option<usize> {
        let mut inner = self.inner.lock();
        if inner.destroyed {
            return Some(0);
        }
        if !allow(&inner.shared) {
            return None;
        }
        Some(Self::release_all(&mut inner))
    }

    fn release_all(inner: &mut Inner<T>) -> usize {
        if inner.destroyed {
            return 0;
        }
        inner.destroyed = true;

        let queued = std::mem::take(&mut inner.waiters);
        let released = queued.len();
        for waiter in queued {
            waiter.record().resolve(WaitState::Destroyed);
            waiter.on_failure(WaitState::Destroyed);
            waiter.wake();
        }
        released
    }

    /// Whether `destroy` has run
    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    /// Number of currently queued waiters
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Read the shared state under the lock
    pub fn with_shared<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.lock().shared)
    }

    /// Mutate the shared state under the lock without scanning waiters
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.lock().shared)
    }
}

/// Rewrites every queued waiter's index to its position once a scan ends
struct Renumber<'a, T>(&'a mut Vec<Arc<dyn Waiter<T>>>);

impl<T> Drop for Renumber<'_, T> {
    fn drop(&mut self) {
        for (position, waiter) in self.0.iter().enumerate() {
            waiter.record().move_to(position);
        }
    }
}

impl<T> Drop for SyncPoint<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T> std::fmt::Debug for SyncPoint<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SyncPoint")
            .field("waiters", &inner.waiters.len())
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}
