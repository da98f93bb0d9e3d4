//! Task structure and fork/join dependency tracking

use crate::scheduler::scheduler::{Handle, Shared};
use crate::scheduler::timer::{deadline_after, Sleep, Timeout, YieldNow};
use crate::sync::{Condition, Latch, ResetMode, WaitFuture, WaitState};
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{trace, warn};

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type Entry = Box<dyn FnOnce(TaskContext) -> BoxFuture + Send + 'static>;

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of a Task. Transitions only move forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Created, not yet started
    Dormant,
    /// Started and waiting in the ready queue for its first resume
    InQueue,
    /// Body executing, suspended, or waiting for its subtasks
    Running,
    /// Body returned and every subtask finished
    Finished,
}

/// Errors that can occur when starting tasks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task left the Dormant state already
    #[error("Task {0} has already been started")]
    AlreadyStarted(TaskId),

    /// Subtasks can only be added by a running task
    #[error("Task {0} is not running")]
    NotRunning(TaskId),

    /// A task cannot be its own subtask
    #[error("Task {0} cannot be a subtask of itself")]
    SelfSubtask(TaskId),

    /// The scheduler is shutting down or has shut down
    #[error("Scheduler is closed")]
    SchedulerClosed,
}

enum Body {
    Dormant(Entry),
    Suspended(BoxFuture),
    Spent,
}

/// Shared state of a task, owned jointly by its handles and the scheduler
pub(crate) struct TaskCell {
    id: TaskId,
    name: Option<String>,
    state: AtomicCell<TaskState>,

    /// Own body plus unfinished subtasks; the task finishes when it hits zero
    dependents: AtomicUsize,

    /// Parent awaiting this task as a subtask; cleared on finish
    parent: Mutex<Weak<TaskCell>>,

    /// Fires once the task is Finished
    done: Condition,

    body: Mutex<Body>,

    // Written only inside the ready queue's critical sections
    polling: AtomicBool,
    notified: AtomicBool,

    /// Parked in the joining table while subtasks are outstanding
    joining: AtomicBool,

    panicked: AtomicBool,
    abandoned: AtomicBool,
}

impl TaskCell {
    fn new(name: Option<String>, entry: Entry) -> Self {
        Self {
            id: TaskId::new(),
            name,
            state: AtomicCell::new(TaskState::Dormant),
            dependents: AtomicUsize::new(0),
            parent: Mutex::new(Weak::new()),
            done: Condition::with_mode(ResetMode::Manual),
            body: Mutex::new(Body::Dormant(entry)),
            polling: AtomicBool::new(false),
            notified: AtomicBool::new(false),
            joining: AtomicBool::new(false),
            panicked: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state.load()
    }

    /// Dormant -> InQueue with a dependent count of one
    pub(crate) fn begin(&self) -> Result<(), TaskError> {
        self.state
            .compare_exchange(TaskState::Dormant, TaskState::InQueue)
            .map_err(|_| TaskError::AlreadyStarted(self.id))?;
        self.dependents.store(1, Ordering::Release);
        Ok(())
    }

    /// InQueue -> Running on the first resume
    pub(crate) fn mark_running(&self) {
        let _ = self
            .state
            .compare_exchange(TaskState::InQueue, TaskState::Running);
    }

    pub(crate) fn add_dependent(&self) {
        self.dependents.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn dependent_count(&self) -> usize {
        self.dependents.load(Ordering::Acquire)
    }

    /// Drop one dependent. Returns true for the last one out.
    pub(crate) fn release(&self) -> bool {
        self.dependents.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn set_parent(&self, parent: &Arc<TaskCell>) {
        *self.parent.lock() = Arc::downgrade(parent);
    }

    /// Mark Finished and fire the completion signal. Returns the parent to
    /// release next, if any.
    pub(crate) fn finish(&self) -> Option<Arc<TaskCell>> {
        self.state.store(TaskState::Finished);
        let parent = std::mem::take(&mut *self.parent.lock()).upgrade();
        self.done.trigger();
        trace!(task = %self.id, "task finished");
        parent
    }

    pub(crate) fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    pub(crate) fn set_polling(&self, polling: bool) {
        self.polling.store(polling, Ordering::Release);
    }

    pub(crate) fn set_notified(&self) {
        self.notified.store(true, Ordering::Release);
    }

    pub(crate) fn take_notified(&self) -> bool {
        self.notified.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn set_joining(&self) {
        self.joining.store(true, Ordering::Release);
    }

    pub(crate) fn is_joining(&self) -> bool {
        self.joining.load(Ordering::Acquire)
    }

    pub(crate) fn set_panicked(&self) {
        self.panicked.store(true, Ordering::Release);
    }

    /// Run the body until it returns or suspends.
    ///
    /// The first call builds the future from the entry closure. Once the
    /// future completes it is dropped here, under the body lock only.
    pub(crate) fn poll_body(self: &Arc<Self>, shared: &Arc<Shared>, cx: &mut Context<'_>) -> Poll<()> {
        let mut body = self.body.lock();
        let mut future = match std::mem::replace(&mut *body, Body::Spent) {
            Body::Dormant(entry) => entry(TaskContext {
                task: Arc::clone(self),
                shared: Arc::clone(shared),
            }),
            Body::Suspended(future) => future,
            Body::Spent => return Poll::Ready(()),
        };
        match future.as_mut().poll(cx) {
            Poll::Pending => {
                *body = Body::Suspended(future);
                Poll::Pending
            }
            Poll::Ready(()) => Poll::Ready(()),
        }
    }

    /// Give up on a task the scheduler will never resume again.
    ///
    /// Must be called outside every synchronization point's lock: dropping
    /// the body may cancel waits and release guards.
    pub(crate) fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
        let body = std::mem::replace(&mut *self.body.lock(), Body::Spent);
        drop(body);
        *self.parent.lock() = Weak::new();
        let released = self.done.abandon();
        trace!(task = %self.id, released, "task abandoned");
    }

    pub(crate) fn done(&self) -> &Condition {
        &self.done
    }
}

impl Drop for TaskCell {
    fn drop(&mut self) {
        if self.state.load() == TaskState::Running && !self.abandoned.load(Ordering::Acquire) {
            warn!(task = %self.id, "running task dropped before finishing");
        }
    }
}

/// A unit of work run by a [`Scheduler`](crate::scheduler::Scheduler).
///
/// `Task` is a cheap handle; clones refer to the same task. A task can be
/// started once, either at top level with [`Task::start`] or as a subtask of
/// a running task with [`TaskContext::subtask`]. It is Finished once its body
/// has returned and every subtask it spawned is Finished.
///
/// Dropping every handle of a started task detaches it; the scheduler keeps
/// it alive until it finishes.
#[derive(Clone)]
pub struct Task {
    cell: Arc<TaskCell>,
}

impl Task {
    /// Create a dormant task from a body
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::build(None, body)
    }

    /// Create a dormant task with a name for logging
    pub fn named<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::build(Some(name.into()), body)
    }

    /// Create a dormant task from a body that never suspends
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        Self::new(move |ctx| async move { f(&ctx) })
    }

    fn build<F, Fut>(name: Option<String>, body: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let entry: Entry = Box::new(move |ctx| Box::pin(body(ctx)));
        Self {
            cell: Arc::new(TaskCell::new(name, entry)),
        }
    }

    /// Start the task as a top-level task on `handle`'s scheduler
    pub fn start(&self, handle: &Handle) -> Result<(), TaskError> {
        handle.shared().admit(&self.cell, None)
    }

    /// Get the task ID
    pub fn id(&self) -> TaskId {
        self.cell.id()
    }

    /// Name given at construction
    pub fn name(&self) -> Option<&str> {
        self.cell.name()
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    /// Whether the task and all its subtasks have finished
    pub fn is_finished(&self) -> bool {
        self.cell.state() == TaskState::Finished
    }

    /// Whether the body panicked
    pub fn panicked(&self) -> bool {
        self.cell.panicked.load(Ordering::Acquire)
    }

    /// Whether the scheduler shut down before the task could finish
    pub fn is_abandoned(&self) -> bool {
        self.cell.abandoned.load(Ordering::Acquire)
    }

    /// Own body plus unfinished subtasks; zero before start and after finish
    pub fn dependent_count(&self) -> usize {
        self.cell.dependent_count()
    }

    /// Block the calling thread until the task finishes.
    ///
    /// Returns `Complete`, or `Destroyed` if the scheduler abandoned the task.
    pub fn wait(&self) -> WaitState {
        self.cell.done.wait()
    }

    /// Block until the task finishes or `timeout` elapses.
    ///
    /// Returns whether the task finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.cell.done.wait_timeout(timeout)
    }

    /// Suspend the current task until this one finishes
    pub fn finished(&self) -> WaitFuture<'_, bool, Latch> {
        self.cell.done.wait_async()
    }

    pub(crate) fn cell(&self) -> &Arc<TaskCell> {
        &self.cell
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .field("state", &self.cell.state())
            .field("dependents", &self.cell.dependent_count())
            .finish()
    }
}

/// Handed to a task body when it first runs.
///
/// Gives the body access to its own task (for subtasks) and to the
/// scheduler's timer.
pub struct TaskContext {
    task: Arc<TaskCell>,
    shared: Arc<Shared>,
}

impl TaskContext {
    /// ID of the running task
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Name of the running task
    pub fn name(&self) -> Option<&str> {
        self.task.name()
    }

    /// Handle to the scheduler running this task
    pub fn handle(&self) -> Handle {
        Handle::from_shared(Arc::clone(&self.shared))
    }

    /// Start `child` as a subtask: this task does not finish until the
    /// child has.
    pub fn subtask(&self, child: &Task) -> Result<(), TaskError> {
        if Arc::ptr_eq(child.cell(), &self.task) {
            return Err(TaskError::SelfSubtask(self.task.id()));
        }
        if self.task.state() != TaskState::Running {
            return Err(TaskError::NotRunning(self.task.id()));
        }
        self.shared.admit(child.cell(), Some(&self.task))
    }

    /// Create and start a subtask from a body
    pub fn spawn_subtask<F, Fut>(&self, body: F) -> Result<Task, TaskError>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let child = Task::new(body);
        self.subtask(&child)?;
        Ok(child)
    }

    /// Suspend for `duration`
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep::new(deadline_after(duration), Arc::clone(&self.shared.timer))
    }

    /// Run `future`, giving up after `duration`
    pub fn timeout<F: Future>(&self, duration: Duration, future: F) -> Timeout<F> {
        Timeout::new(future, self.sleep(duration))
    }

    /// Go to the back of the ready queue
    pub fn yield_now(&self) -> YieldNow {
        YieldNow::default()
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext").field("task", &self.task.id).finish()
    }
}
