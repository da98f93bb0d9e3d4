//! Executor thread that runs Tasks
//!
//! Executors wait on the ready-signal for work, resume one task at a time,
//! and hand it back to the run queue when it suspends. A suspended task is
//! never polled again until its waker moves it from the blocked set back
//! onto the ready queue.

use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::scheduler::{RunQueue, Shared};
use crate::scheduler::task::TaskCell;
use crate::sync::{ParkedWaiter, WaitPolicy, WaitState};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::thread;
use tracing::{debug, error, trace, warn};

/// Executor thread of a [`Scheduler`](crate::scheduler::Scheduler)
pub(crate) struct Worker {
    /// Worker ID
    id: usize,

    shared: Arc<Shared>,

    /// Worker thread handle
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn new(id: usize, shared: Arc<Shared>) -> Self {
        Self {
            id,
            shared,
            handle: None,
        }
    }

    /// Start the worker thread
    pub(crate) fn start(&mut self, config: &SchedulerConfig) -> std::io::Result<()> {
        let id = self.id;
        let shared = Arc::clone(&self.shared);

        let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name, id));
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }

        self.shared.active_executors.fetch_add(1, Ordering::AcqRel);
        match builder.spawn(move || Worker::run_loop(id, shared)) {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.active_executors.fetch_sub(1, Ordering::AcqRel);
                Err(err)
            }
        }
    }

    /// Wait for the worker thread to leave its loop
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(executor = self.id, "executor thread panicked");
            }
        }
    }

    /// Worker thread main loop
    fn run_loop(id: usize, shared: Arc<Shared>) {
        debug!(executor = id, "executor started");

        loop {
            let waiter = ParkedWaiter::new(Dequeue::default());
            if shared.run_queue.block(&waiter) != WaitState::Complete {
                break;
            }
            // Granted with nothing to take: closed and drained
            let Some(task) = waiter.policy().take() else {
                break;
            };
            resume(&shared, task);
        }

        shared.active_executors.fetch_sub(1, Ordering::AcqRel);
        debug!(executor = id, "executor stopped");
    }
}

/// Ready-signal policy: proceed when there is work or the queue closed,
/// taking the front task with the lock still held
#[derive(Default)]
struct Dequeue {
    slot: Mutex<Option<Arc<TaskCell>>>,
}

impl Dequeue {
    fn take(&self) -> Option<Arc<TaskCell>> {
        self.slot.lock().take()
    }
}

impl WaitPolicy<RunQueue> for Dequeue {
    fn test(&self, queue: &RunQueue) -> bool {
        !queue.ready.is_empty() || queue.closed
    }

    fn act(&self, queue: &mut RunQueue) {
        if let Some(task) = queue.ready.pop_front() {
            task.set_polling(true);
            *self.slot.lock() = Some(task);
        }
    }
}

/// Poll a task once and route it by the outcome
fn resume(shared: &Arc<Shared>, task: Arc<TaskCell>) {
    task.mark_running();
    trace!(task = %task.id(), "resuming task");

    let waker = Waker::from(Arc::new(TaskWaker {
        task: Arc::clone(&task),
        shared: Arc::downgrade(shared),
    }));
    let mut cx = Context::from_waker(&waker);

    match panic::catch_unwind(AssertUnwindSafe(|| task.poll_body(shared, &mut cx))) {
        Ok(Poll::Pending) => suspend(shared, task),
        Ok(Poll::Ready(())) => {
            trace!(task = %task.id(), "task body returned");
            body_returned(shared, task);
        }
        Err(payload) => {
            error!(
                task = %task.id(),
                name = task.name().unwrap_or(""),
                "task body panicked: {}",
                panic_message(payload.as_ref())
            );
            task.set_panicked();
            body_returned(shared, task);
        }
    }
}

/// Park a suspended task, unless it was woken while being polled
fn suspend(shared: &Shared, task: Arc<TaskCell>) {
    shared.run_queue.trigger(|queue| {
        task.set_polling(false);
        if task.take_notified() {
            queue.ready.push_back(task);
            1usize
        } else {
            queue.blocked.insert(task.id(), task);
            0
        }
    });
}

fn body_returned(shared: &Shared, task: Arc<TaskCell>) {
    if task.dependent_count() > 1 {
        // Subtasks outstanding: something has to own the task until they finish
        task.set_joining();
        shared
            .run_queue
            .update(|queue| queue.joining.insert(task.id(), Arc::clone(&task)));
    }
    retire(shared, task);
}

/// Release one dependent of `task`, finishing it and walking up the parent
/// chain for every count that reaches zero
fn retire(shared: &Shared, task: Arc<TaskCell>) {
    let mut next = Some(task);
    while let Some(task) = next.take() {
        if !task.release() {
            break;
        }
        shared.tasks_finished.fetch_add(1, Ordering::Relaxed);
        if task.is_joining() {
            let joined = shared.run_queue.update(|queue| queue.joining.remove(&task.id()));
            drop(joined);
        }
        next = task.finish();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Waker of a task: moves it from the blocked set back to the ready queue
struct TaskWaker {
    task: Arc<TaskCell>,
    shared: Weak<Shared>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let id = self.task.id();
        shared.run_queue.trigger(|queue| {
            if let Some(task) = queue.blocked.remove(&id) {
                queue.ready.push_back(task);
                1usize
            } else {
                // Still being polled: the executor re-queues it on suspend
                if self.task.is_polling() {
                    self.task.set_notified();
                }
                0
            }
        });
    }
}
