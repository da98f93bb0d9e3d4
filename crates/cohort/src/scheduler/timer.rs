//! Timer thread for task sleeps and timeouts
//!
//! Instead of polling for sleeping tasks, this timer thread waits for the
//! next deadline using condvar timeouts and wakes the suspended task's
//! `Waker`, which puts it back on the ready queue.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Entry in the timer heap
struct TimerEntry {
    /// When to wake
    deadline: Instant,
    /// Registration order, breaks ties between equal deadlines
    seq: u64,
    waker: Waker,
}

// Reverse ordering for min-heap (earliest deadline first)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

#[derive(Default)]
struct TimerState {
    entries: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

/// Timer thread shared by every task of one scheduler
pub(crate) struct TimerThread {
    state: Mutex<TimerState>,
    /// Wakes the timer thread when an earlier entry is added or on shutdown
    notify: Condvar,
    shutdown: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerThread {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimerState::default()),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    /// Start the timer thread
    pub(crate) fn start(self: &Arc<Self>, name: String) -> std::io::Result<()> {
        let timer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || timer.run_loop())?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop the timer thread. Pending wakers are dropped without waking.
    pub(crate) fn stop(&self) {
        {
            let mut state = self.state.lock();
            self.shutdown.store(true, AtomicOrdering::Release);
            state.entries.clear();
            self.notify.notify_one();
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("timer thread panicked");
            }
        }
    }

    /// Wake `waker` once `deadline` has passed
    pub(crate) fn register(&self, deadline: Instant, waker: Waker) {
        let mut state = self.state.lock();
        if self.shutdown.load(AtomicOrdering::Acquire) {
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(TimerEntry {
            deadline,
            seq,
            waker,
        });
        // It might need to wake earlier than currently scheduled
        self.notify.notify_one();
    }

    /// Number of registered deadlines
    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn run_loop(&self) {
        let mut expired = Vec::new();
        loop {
            {
                let mut state = self.state.lock();
                // Checked under the lock so a stop() between iterations is not lost
                if self.shutdown.load(AtomicOrdering::Acquire) {
                    break;
                }

                let now = Instant::now();
                while state.entries.peek().is_some_and(|entry| entry.deadline <= now) {
                    if let Some(entry) = state.entries.pop() {
                        expired.push(entry.waker);
                    }
                }

                if expired.is_empty() {
                    match state.entries.peek().map(|entry| entry.deadline) {
                        Some(deadline) => {
                            self.notify.wait_until(&mut state, deadline);
                        }
                        None => self.notify.wait(&mut state),
                    }
                    continue;
                }
            }

            // Wake outside the lock: wakers take the ready queue's lock
            for waker in expired.drain(..) {
                waker.wake();
            }
        }

        debug!("timer thread shutting down");
    }
}

/// Future returned by [`TaskContext::sleep`](crate::scheduler::TaskContext::sleep)
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    deadline: Instant,
    timer: Arc<TimerThread>,
    registered: Option<Waker>,
}

impl Sleep {
    pub(crate) fn new(deadline: Instant, timer: Arc<TimerThread>) -> Self {
        Self {
            deadline,
            timer,
            registered: None,
        }
    }

    /// When this sleep completes
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if Instant::now() >= self.deadline {
            return Poll::Ready(());
        }
        let stale = match &self.registered {
            Some(waker) => !waker.will_wake(cx.waker()),
            None => true,
        };
        if stale {
            self.timer.register(self.deadline, cx.waker().clone());
            self.registered = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Error returned when a [`Timeout`] deadline elapses first
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline elapsed")]
pub struct Elapsed;

/// Future returned by [`TaskContext::timeout`](crate::scheduler::TaskContext::timeout).
///
/// Dropping the inner future when the deadline wins cancels whatever wait
/// it was suspended on.
#[must_use = "futures do nothing unless polled"]
pub struct Timeout<F> {
    future: Pin<Box<F>>,
    sleep: Sleep,
}

impl<F: Future> Timeout<F> {
    pub(crate) fn new(future: F, sleep: Sleep) -> Self {
        Self {
            future: Box::pin(future),
            sleep,
        }
    }
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Poll::Ready(output) = self.future.as_mut().poll(cx) {
            return Poll::Ready(Ok(output));
        }
        match Pin::new(&mut self.sleep).poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(Elapsed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Future returned by [`TaskContext::yield_now`](crate::scheduler::TaskContext::yield_now)
#[must_use = "futures do nothing unless polled"]
#[derive(Debug, Default)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Convenience for callers that hold a duration rather than a deadline
pub(crate) fn deadline_after(duration: Duration) -> Instant {
    Instant::now() + duration
}
