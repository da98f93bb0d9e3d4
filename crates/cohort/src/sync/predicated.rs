//! Condition over an arbitrary caller-supplied predicate

use crate::sync::point::{SyncPoint, TriggerResult};
use crate::sync::wait::{ParkedWaiter, WaitFuture, WaitPolicy};
use crate::sync::waiter::WaitState;
use std::time::{Duration, Instant};

/// Waiter policy built from a predicate and an on-satisfied action
pub struct Satisfy<P, A> {
    predicate: P,
    on_satisfied: A,
}

impl<T, P, A> WaitPolicy<T> for Satisfy<P, A>
where
    P: Fn(&T) -> bool + Send + Sync + 'static,
    A: Fn(&mut T) + Send + Sync + 'static,
{
    fn test(&self, shared: &T) -> bool {
        (self.predicate)(shared)
    }

    fn act(&self, shared: &mut T) {
        (self.on_satisfied)(shared)
    }
}

type NoAction<T> = fn(&mut T);

fn no_action<T>(_: &mut T) {}

/// A value guarded by a synchronization point; waiters pass once their own
/// predicate over the value holds.
///
/// The predicate is re-evaluated on every trigger. `wait_then` runs its
/// action under the same lock as the successful predicate test, so the
/// caller acts on the proof without a window for another trigger to race in.
pub struct PredicatedCondition<T> {
    point: SyncPoint<T>,
}

impl<T: Send + 'static> PredicatedCondition<T> {
    /// Create a condition guarding `value`
    pub fn new(value: T) -> Self {
        Self {
            point: SyncPoint::new(value),
        }
    }

    /// Block the calling thread until `predicate` holds
    pub fn wait<P>(&self, predicate: P) -> WaitState
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.wait_then(predicate, no_action::<T> as NoAction<T>)
    }

    /// Block until `predicate` holds, then run `on_satisfied` atomically
    /// with that proof
    pub fn wait_then<P, A>(&self, predicate: P, on_satisfied: A) -> WaitState
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
        A: Fn(&mut T) + Send + Sync + 'static,
    {
        let waiter = ParkedWaiter::new(Satisfy {
            predicate,
            on_satisfied,
        });
        self.point.block(&waiter)
    }

    /// Block until `predicate` holds or `timeout` elapses.
    ///
    /// Returns `Complete`, `TimedOut` or `Destroyed`.
    pub fn wait_timeout<P>(&self, predicate: P, timeout: Duration) -> WaitState
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let waiter = ParkedWaiter::new(Satisfy {
            predicate,
            on_satisfied: no_action::<T> as NoAction<T>,
        });
        self.point.block_until(&waiter, Instant::now() + timeout)
    }

    /// Suspend the current task until `predicate` holds
    pub fn wait_async<P>(&self, predicate: P) -> WaitFuture<'_, T, Satisfy<P, NoAction<T>>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.wait_then_async(predicate, no_action::<T> as NoAction<T>)
    }

    /// Suspend until `predicate` holds, then run `on_satisfied` atomically
    /// with that proof
    pub fn wait_then_async<P, A>(
        &self,
        predicate: P,
        on_satisfied: A,
    ) -> WaitFuture<'_, T, Satisfy<P, A>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
        A: Fn(&mut T) + Send + Sync + 'static,
    {
        self.point.suspend(Satisfy {
            predicate,
            on_satisfied,
        })
    }

    /// Mutate the value and wake waiters whose predicate now holds.
    ///
    /// The mutator's return type selects the form; see [`TriggerResult`].
    pub fn trigger<R, F>(&self, mutator: F) -> usize
    where
        R: TriggerResult,
        F: FnOnce(&mut T) -> R,
    {
        self.point.trigger(mutator)
    }

    /// Mutate the value and wake at most `max_wake` satisfied waiters
    pub fn trigger_limited<F>(&self, mutator: F, max_wake: usize) -> usize
    where
        F: FnOnce(&mut T),
    {
        self.point.trigger(|value| {
            mutator(value);
            max_wake
        })
    }

    /// Run `action` on the value under the lock and return its result.
    ///
    /// Waiters whose predicate the action satisfied are woken before the
    /// lock is released, as with a unit-form `trigger`.
    pub fn protected_action<R>(&self, action: impl FnOnce(&mut T) -> R) -> R {
        self.point.modify(action)
    }

    /// Read the value under the lock
    pub fn peek<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.point.with_shared(f)
    }

    /// Get number of waiting threads and tasks
    pub fn waiting_count(&self) -> usize {
        self.point.waiter_count()
    }

    /// Destroy the condition; queued and later waits resolve as `Destroyed`
    pub fn destroy(&self) -> usize {
        self.point.destroy()
    }
}

impl<T: Default + Send + 'static> Default for PredicatedCondition<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_predicate_fast_path() {
        let condition = PredicatedCondition::new(3u32);
        assert_eq!(condition.wait(|v| *v == 3), WaitState::Complete);
    }

    #[test]
    fn test_wait_then_acts_on_proof() {
        let condition = Arc::new(PredicatedCondition::new(Vec::<u32>::new()));

        let consumer = {
            let condition = condition.clone();
            thread::spawn(move || {
                condition.wait_then(|items| !items.is_empty(), |items| {
                    items.pop();
                })
            })
        };

        while condition.waiting_count() == 0 {
            thread::yield_now();
        }
        condition.trigger(|items| items.push(1));

        assert_eq!(consumer.join().unwrap(), WaitState::Complete);
        assert!(condition.peek(|items| items.is_empty()));
    }

    #[test]
    fn test_trigger_limited() {
        let condition = Arc::new(PredicatedCondition::new(0u32));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let condition = condition.clone();
                thread::spawn(move || condition.wait_timeout(|v| *v > 0, Duration::from_millis(300)))
            })
            .collect();

        while condition.waiting_count() < 3 {
            thread::yield_now();
        }
        assert_eq!(condition.trigger_limited(|v| *v = 1, 2), 2);
        assert_eq!(condition.waiting_count(), 1);

        let states: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(states.iter().filter(|s| **s == WaitState::Complete).count(), 2);
        assert_eq!(states.iter().filter(|s| **s == WaitState::TimedOut).count(), 1);
    }

    #[test]
    fn test_protected_action_returns_result() {
        let condition = PredicatedCondition::new(0u32);
        let doubled = condition.protected_action(|v| {
            *v = 21;
            *v * 2
        });
        assert_eq!(doubled, 42);
        assert_eq!(condition.peek(|v| *v), 21);
    }

    #[test]
    fn test_protected_action_wakes_satisfied_waiter() {
        let condition = Arc::new(PredicatedCondition::new(0u32));
        let waiter = {
            let condition = condition.clone();
            thread::spawn(move || condition.wait_timeout(|v| *v == 1, Duration::from_secs(5)))
        };
        while condition.waiting_count() == 0 {
            thread::yield_now();
        }

        condition.protected_action(|v| *v = 1);
        assert_eq!(waiter.join().unwrap(), WaitState::Complete);
        assert_eq!(condition.waiting_count(), 0);
    }

    #[test]
    fn test_panicking_predicate_keeps_other_waiters() {
        let condition = Arc::new(PredicatedCondition::new(0u32));
        let patient = {
            let condition = condition.clone();
            thread::spawn(move || condition.wait_timeout(|v| *v >= 5, Duration::from_secs(5)))
        };
        while condition.waiting_count() == 0 {
            thread::yield_now();
        }
        let faulty = {
            let condition = condition.clone();
            thread::spawn(move || {
                condition.wait_timeout(
                    |v| {
                        assert_ne!(*v, 1, "predicate rejects 1");
                        false
                    },
                    Duration::from_millis(200),
                )
            })
        };
        while condition.waiting_count() < 2 {
            thread::yield_now();
        }

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            condition.trigger(|v| *v = 1)
        }));
        assert!(result.is_err());
        assert_eq!(condition.waiting_count(), 2);

        // The faulty waiter still times out cleanly
        assert_eq!(faulty.join().unwrap(), WaitState::TimedOut);
        assert_eq!(condition.trigger(|v| *v = 5), 1);
        assert_eq!(patient.join().unwrap(), WaitState::Complete);
        assert_eq!(condition.waiting_count(), 0);
    }

    #[test]
    fn test_destroy_releases_with_destroyed() {
        let condition = Arc::new(PredicatedCondition::new(0u32));
        let waiter = {
            let condition = condition.clone();
            thread::spawn(move || condition.wait(|v| *v == 99))
        };
        while condition.waiting_count() == 0 {
            thread::yield_now();
        }
        assert_eq!(condition.destroy(), 1);
        assert_eq!(waiter.join().unwrap(), WaitState::Destroyed);
    }
}
