//! Waiting on groups of tasks

use crate::scheduler::task::Task;
use crate::sync::{Latch, Parker, ParkedWaiter, ResetMode, WaitState};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Block the calling thread until every task has finished.
///
/// Returns `Complete`, or `Destroyed` if any task was abandoned.
pub fn wait_for_all(tasks: &[Task]) -> WaitState {
    let mut outcome = WaitState::Complete;
    for task in tasks {
        if task.wait() != WaitState::Complete {
            outcome = WaitState::Destroyed;
        }
    }
    outcome
}

/// Suspend the current task until every task in `tasks` has finished
pub async fn wait_for_all_async(tasks: &[Task]) -> WaitState {
    let mut outcome = WaitState::Complete;
    for task in tasks {
        if task.finished().await != WaitState::Complete {
            outcome = WaitState::Destroyed;
        }
    }
    outcome
}

/// One completion waiter per task, all releasing the same parker
struct AnyGroup<'a> {
    tasks: &'a [Task],
    parker: Arc<Parker>,
    waiters: Vec<(usize, Arc<ParkedWaiter<Latch>>)>,
}

enum Registered {
    /// A task had already finished
    Finished(usize),
    /// No task can ever finish
    Hopeless,
    Waiting,
}

impl<'a> AnyGroup<'a> {
    fn new(tasks: &'a [Task]) -> Self {
        Self {
            tasks,
            parker: Arc::new(Parker::new()),
            waiters: Vec::with_capacity(tasks.len()),
        }
    }

    fn register(&mut self) -> Registered {
        for (index, task) in self.tasks.iter().enumerate() {
            let waiter =
                ParkedWaiter::with_parker(Latch::new(ResetMode::Manual), Arc::clone(&self.parker));
            match task.cell().done().point().wait(&waiter) {
                WaitState::Waiting => self.waiters.push((index, waiter)),
                WaitState::Complete => {
                    self.cancel_all();
                    return Registered::Finished(index);
                }
                // Abandoned: it will never finish
                _ => {}
            }
        }
        if self.waiters.is_empty() {
            Registered::Hopeless
        } else {
            Registered::Waiting
        }
    }

    /// Withdraw every waiter; report the first that completed. `None` means
    /// the parker was released by abandoned members only.
    fn resolve(&mut self) -> Option<usize> {
        let mut winner = None;
        for (index, waiter) in self.waiters.drain(..) {
            self.tasks[index].cell().done().point().cancel(&*waiter);
            if winner.is_none() && waiter.state() == WaitState::Complete {
                winner = Some(index);
            }
        }
        winner
    }

    /// Start a new round on a fresh parker after a `resolve` that found no
    /// winner; the next `register` skips abandoned members
    fn rearm(&mut self) {
        debug_assert!(self.waiters.is_empty());
        self.parker = Arc::new(Parker::new());
    }

    fn cancel_all(&mut self) {
        self.resolve();
    }
}

/// Block the calling thread until any task has finished.
///
/// Returns the index of a finished task, or `None` if `tasks` is empty or
/// every task in it was abandoned.
pub fn wait_for_any(tasks: &[Task]) -> Option<usize> {
    let mut group = AnyGroup::new(tasks);
    loop {
        match group.register() {
            Registered::Finished(index) => return Some(index),
            Registered::Hopeless => return None,
            Registered::Waiting => {}
        }
        group.parker.park();
        if let Some(index) = group.resolve() {
            return Some(index);
        }
        group.rearm();
    }
}

/// Suspend the current task until any task in `tasks` has finished
pub fn wait_for_any_async(tasks: &[Task]) -> AnyFinished<'_> {
    AnyFinished {
        group: AnyGroup::new(tasks),
        registered: false,
        done: false,
    }
}

/// Future returned by [`wait_for_any_async`]
#[must_use = "futures do nothing unless polled"]
pub struct AnyFinished<'a> {
    group: AnyGroup<'a>,
    registered: bool,
    done: bool,
}

impl Future for AnyFinished<'_> {
    type Output = Option<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<usize>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            if !this.registered {
                this.registered = true;
                match this.group.register() {
                    Registered::Finished(index) => {
                        this.done = true;
                        return Poll::Ready(Some(index));
                    }
                    Registered::Hopeless => {
                        this.done = true;
                        return Poll::Ready(None);
                    }
                    Registered::Waiting => {}
                }
            }
            if this.group.parker.poll_park(cx).is_pending() {
                return Poll::Pending;
            }
            if let Some(index) = this.group.resolve() {
                this.done = true;
                return Poll::Ready(Some(index));
            }
            this.group.rearm();
            this.registered = false;
        }
    }
}

impl Drop for AnyFinished<'_> {
    fn drop(&mut self) {
        if self.registered && !self.done {
            self.group.cancel_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_for_any_empty() {
        assert_eq!(wait_for_any(&[]), None);
    }

    #[test]
    fn test_wait_for_all_empty() {
        assert_eq!(wait_for_all(&[]), WaitState::Complete);
    }

    #[test]
    fn test_wait_for_any_abandoned() {
        let tasks = vec![Task::new(|_ctx| async {}), Task::new(|_ctx| async {})];
        for task in &tasks {
            task.cell().abandon();
        }
        assert_eq!(wait_for_any(&tasks), None);
        assert_eq!(wait_for_all(&tasks), WaitState::Destroyed);
    }

    #[test]
    fn test_wait_for_any_outlasts_abandoned_member() {
        let tasks = vec![Task::new(|_ctx| async {}), Task::new(|_ctx| async {})];
        let survivor = tasks[1].cell();
        survivor.begin().unwrap();

        let waiter = {
            let tasks = tasks.clone();
            std::thread::spawn(move || wait_for_any(&tasks))
        };
        while survivor.done().waiting_count() == 0 {
            std::thread::yield_now();
        }

        tasks[0].cell().abandon();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());

        assert!(survivor.release());
        survivor.finish();
        assert_eq!(waiter.join().unwrap(), Some(1));
    }

    #[test]
    fn test_wait_for_any_already_finished() {
        let tasks = vec![Task::new(|_ctx| async {}), Task::new(|_ctx| async {})];
        let finished = tasks[1].cell();
        finished.begin().unwrap();
        assert!(finished.release());
        finished.finish();

        assert_eq!(wait_for_any(&tasks), Some(1));
        assert_eq!(tasks[0].cell().done().waiting_count(), 0);
    }
}
