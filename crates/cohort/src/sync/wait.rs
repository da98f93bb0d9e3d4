//! Parked waiters: blocking, deadline and suspending waits over a `SyncPoint`

use crate::sync::parker::Parker;
use crate::sync::point::SyncPoint;
use crate::sync::waiter::{WaitRecord, WaitState, Waiter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

/// Predicate and atomic action of one kind of waiter.
///
/// Runs under the synchronization point's lock; see [`Waiter`].
pub trait WaitPolicy<T>: Send + Sync + 'static {
    /// May the waiter proceed?
    fn test(&self, shared: &T) -> bool;

    /// Act on the satisfied predicate
    fn act(&self, _shared: &mut T) {}

    /// Undo `act` for a suspended wait that was granted but dropped before
    /// it observed the grant. Returns how many waiters the undo may wake.
    fn undo(&self, _shared: &mut T) -> usize {
        0
    }
}

/// A waiter that suspends through a [`Parker`]
pub struct ParkedWaiter<P> {
    record: WaitRecord,
    parker: Arc<Parker>,
    policy: P,
}

impl<P> ParkedWaiter<P> {
    /// Create a waiter with its own parker
    pub fn new(policy: P) -> Arc<Self> {
        Self::with_parker(policy, Arc::new(Parker::new()))
    }

    /// Create a waiter releasing a shared parker; any member of the group
    /// resolving releases the whole group
    pub fn with_parker(policy: P, parker: Arc<Parker>) -> Arc<Self> {
        Arc::new(Self {
            record: WaitRecord::new(),
            parker,
            policy,
        })
    }

    /// Current outcome of the attempt
    pub fn state(&self) -> WaitState {
        self.record.state()
    }

    /// The policy this waiter was built with
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// The parker this waiter releases
    pub fn parker(&self) -> &Arc<Parker> {
        &self.parker
    }
}

impl<T, P: WaitPolicy<T>> Waiter<T> for ParkedWaiter<P> {
    fn record(&self) -> &WaitRecord {
        &self.record
    }

    fn test_predicate(&self, shared: &T) -> bool {
        self.policy.test(shared)
    }

    fn atomic_action(&self, shared: &mut T) {
        self.policy.act(shared)
    }

    fn mark_for_suspend(&self) {
        self.parker.arm();
    }

    fn wake(&self) {
        self.parker.unpark();
    }
}

impl<T> SyncPoint<T> {
    /// Wait on the calling thread until the attempt resolves
    pub fn block<P: WaitPolicy<T>>(&self, waiter: &Arc<ParkedWaiter<P>>) -> WaitState {
        if self.wait(waiter) == WaitState::Waiting {
            waiter.parker.park();
        }
        waiter.state()
    }

    /// Wait on the calling thread until the attempt resolves or `deadline`
    /// passes; in the latter case the attempt resolves as `TimedOut`
    pub fn block_until<P: WaitPolicy<T>>(
        &self,
        waiter: &Arc<ParkedWaiter<P>>,
        deadline: Instant,
    ) -> WaitState {
        if self.wait(waiter) != WaitState::Waiting {
            return waiter.state();
        }
        if !waiter.parker.park_until(deadline)
            && self.cancel_with(&**waiter, WaitState::TimedOut)
        {
            return WaitState::TimedOut;
        }
        // A failed cancel means the record was resolved under the point's lock
        waiter.state()
    }

    /// Wait by suspending the current future
    pub fn suspend<P: WaitPolicy<T>>(&self, policy: P) -> WaitFuture<'_, T, P> {
        WaitFuture {
            point: self,
            waiter: ParkedWaiter::new(policy),
            phase: Phase::Idle,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Queued,
    Done,
}

/// Future of a suspending wait; resolves to the attempt's outcome.
///
/// Dropping it while queued cancels the attempt. If the attempt had already
/// been granted but the grant was never observed, the policy's `undo` runs.
#[must_use = "futures do nothing unless polled"]
pub struct WaitFuture<'a, T, P: WaitPolicy<T>> {
    point: &'a SyncPoint<T>,
    waiter: Arc<ParkedWaiter<P>>,
    phase: Phase,
}

impl<T, P: WaitPolicy<T>> WaitFuture<'_, T, P> {
    /// The waiter driving this future
    pub fn waiter(&self) -> &Arc<ParkedWaiter<P>> {
        &self.waiter
    }
}

impl<T, P: WaitPolicy<T>> Future for WaitFuture<'_, T, P> {
    type Output = WaitState;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<WaitState> {
        let this = self.get_mut();
        if this.phase == Phase::Idle {
            if this.point.wait(&this.waiter) != WaitState::Waiting {
                this.phase = Phase::Done;
                return Poll::Ready(this.waiter.state());
            }
            this.phase = Phase::Queued;
        }
        if this.phase == Phase::Queued {
            if this.waiter.parker.poll_park(cx).is_pending() {
                return Poll::Pending;
            }
            this.phase = Phase::Done;
        }
        Poll::Ready(this.waiter.state())
    }
}

impl<T, P: WaitPolicy<T>> Drop for WaitFuture<'_, T, P> {
    fn drop(&mut self) {
        if self.phase != Phase::Queued {
            return;
        }
        if self.point.cancel(&*self.waiter) {
            return;
        }
        if self.waiter.state() == WaitState::Complete {
            let policy = &self.waiter.policy;
            self.point.trigger(|shared| policy.undo(shared));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    struct AtLeast(u32);

    impl WaitPolicy<u32> for AtLeast {
        fn test(&self, shared: &u32) -> bool {
            *shared >= self.0
        }
    }

    #[test]
    fn test_block_released_by_trigger() {
        let point = Arc::new(SyncPoint::new(0u32));

        let remote = point.clone();
        let handle = thread::spawn(move || {
            while remote.waiter_count() == 0 {
                thread::yield_now();
            }
            remote.trigger(|v| *v = 7);
        });

        let waiter = ParkedWaiter::new(AtLeast(5));
        assert_eq!(point.block(&waiter), WaitState::Complete);
        handle.join().unwrap();
    }

    #[test]
    fn test_block_until_times_out() {
        let point = SyncPoint::new(0u32);
        let waiter = ParkedWaiter::new(AtLeast(1));

        let state = point.block_until(&waiter, Instant::now() + Duration::from_millis(20));
        assert_eq!(state, WaitState::TimedOut);
        assert_eq!(point.waiter_count(), 0);
    }

    #[test]
    fn test_shared_parker_released_by_any_member() {
        let first = SyncPoint::new(0u32);
        let second = SyncPoint::new(0u32);
        let parker = Arc::new(Parker::new());

        let a = ParkedWaiter::with_parker(AtLeast(1), parker.clone());
        let b = ParkedWaiter::with_parker(AtLeast(1), parker.clone());
        assert_eq!(first.wait(&a), WaitState::Waiting);
        assert_eq!(second.wait(&b), WaitState::Waiting);

        second.trigger(|v| *v = 1);
        parker.park();

        assert_eq!(b.state(), WaitState::Complete);
        assert!(first.cancel(&*a));
        assert_eq!(a.state(), WaitState::Canceled);
    }
}
