//! Main task scheduler coordinating executor threads

use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::task::{Task, TaskCell, TaskContext, TaskError, TaskId};
use crate::scheduler::timer::TimerThread;
use crate::scheduler::worker::Worker;
use crate::sync::SyncPoint;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Errors that can occur when starting a scheduler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The OS refused to create an executor or timer thread
    #[error("Failed to spawn scheduler thread: {0}")]
    Spawn(String),

    /// `start` was called after `shutdown`
    #[error("Scheduler has been shut down")]
    ShutDown,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Total tasks started, top level and subtasks
    pub tasks_started: u64,

    /// Total tasks finished
    pub tasks_finished: u64,

    /// Tasks waiting in the ready queue
    pub ready: usize,

    /// Tasks suspended on some synchronization point
    pub blocked: usize,

    /// Tasks whose body returned while subtasks are outstanding
    pub joining: usize,

    /// Executor threads currently in their run loop
    pub active_executors: usize,
}

/// Everything guarded by the ready-signal's lock
#[derive(Default)]
pub(crate) struct RunQueue {
    /// Tasks eligible to run, in arrival order
    pub(crate) ready: VecDeque<Arc<TaskCell>>,

    /// Suspended tasks, keyed by ID so their waker can find them
    pub(crate) blocked: FxHashMap<TaskId, Arc<TaskCell>>,

    /// Tasks kept alive until their last subtask finishes
    pub(crate) joining: FxHashMap<TaskId, Arc<TaskCell>>,

    /// No new tasks may be admitted
    pub(crate) closed: bool,
}

/// State shared by the scheduler, its executors and every task waker
pub(crate) struct Shared {
    /// Ready-signal: executors wait here for work
    pub(crate) run_queue: SyncPoint<RunQueue>,

    pub(crate) timer: Arc<TimerThread>,

    pub(crate) active_executors: AtomicUsize,
    pub(crate) tasks_started: AtomicU64,
    pub(crate) tasks_finished: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            run_queue: SyncPoint::new(RunQueue::default()),
            timer: TimerThread::new(),
            active_executors: AtomicUsize::new(0),
            tasks_started: AtomicU64::new(0),
            tasks_finished: AtomicU64::new(0),
        }
    }

    /// Move a dormant task into the ready queue, optionally as a subtask
    /// of `parent`. Wakes at most one idle executor.
    pub(crate) fn admit(
        &self,
        task: &Arc<TaskCell>,
        parent: Option<&Arc<TaskCell>>,
    ) -> Result<(), TaskError> {
        let mut admitted = Ok(());
        self.run_queue.trigger(|queue| {
            if queue.closed {
                admitted = Err(TaskError::SchedulerClosed);
                return 0;
            }
            if let Err(err) = task.begin() {
                admitted = Err(err);
                return 0;
            }
            if let Some(parent) = parent {
                parent.add_dependent();
                task.set_parent(parent);
            }
            queue.ready.push_back(Arc::clone(task));
            1usize
        });
        admitted?;

        self.tasks_started.fetch_add(1, Ordering::Relaxed);
        trace!(
            task = %task.id(),
            name = task.name().unwrap_or(""),
            parent = ?parent.map(|p| p.id()),
            "task admitted"
        );
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.run_queue.with_shared(|queue| queue.closed)
    }
}

/// Cloneable handle for starting tasks on a scheduler
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Create and start a top-level task
    pub fn spawn<F, Fut>(&self, body: F) -> Result<Task, TaskError>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = Task::new(body);
        task.start(self)?;
        Ok(task)
    }

    /// Whether the scheduler stopped admitting tasks
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Cooperative task scheduler.
///
/// A fixed pool of executor threads runs tasks from a shared ready queue.
/// A task that suspends leaves the queue until the synchronization point it
/// waits on wakes it again. Tasks may be started before `start`; they run
/// once executors exist.
pub struct Scheduler {
    config: SchedulerConfig,

    /// Number of executor threads
    worker_count: usize,

    /// Executor threads
    workers: Vec<Worker>,

    handle: Handle,

    /// Whether the scheduler has been started
    started: bool,

    /// Whether shutdown has run
    stopped: bool,
}

impl Scheduler {
    /// Create a new scheduler. Threads are created by [`Scheduler::start`].
    pub fn new(config: SchedulerConfig) -> Self {
        let worker_count = config.resolved_worker_count();
        Self {
            config,
            worker_count,
            workers: Vec::with_capacity(worker_count),
            handle: Handle::from_shared(Arc::new(Shared::new())),
            started: false,
            stopped: false,
        }
    }

    /// Create a scheduler with `worker_count` executors (0 = one per CPU)
    pub fn with_workers(worker_count: usize) -> Self {
        Self::new(SchedulerConfig::default().with_workers(worker_count))
    }

    /// Start the timer and executor threads
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.stopped {
            return Err(SchedulerError::ShutDown);
        }
        if self.started {
            return Ok(());
        }
        // Threads spawned before a failure are joined by shutdown
        self.started = true;

        let shared = self.handle.shared();
        shared
            .timer
            .start(format!("{}-timer", self.config.thread_name))
            .map_err(|err| SchedulerError::Spawn(err.to_string()))?;

        for id in 0..self.worker_count {
            let mut worker = Worker::new(id, Arc::clone(shared));
            worker
                .start(&self.config)
                .map_err(|err| SchedulerError::Spawn(err.to_string()))?;
            self.workers.push(worker);
        }

        debug!(workers = self.worker_count, "scheduler started");
        Ok(())
    }

    /// Create and start a top-level task
    pub fn spawn<F, Fut>(&self, body: F) -> Result<Task, TaskError>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(body)
    }

    /// Handle for starting tasks from other threads
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Get the number of executor threads
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Configuration the scheduler was built with
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Check if scheduler is started
    pub fn is_started(&self) -> bool {
        self.started && !self.stopped
    }

    /// Shut down the scheduler.
    ///
    /// Closes the ready queue, lets the executors drain it, and joins them.
    /// Tasks still suspended at that point are abandoned: their waiters
    /// resolve with `WaitState::Destroyed`.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        debug!("scheduler shutting down");

        let shared = Arc::clone(self.handle.shared());
        shared.run_queue.trigger(|queue| queue.closed = true);

        for worker in &mut self.workers {
            worker.join();
        }
        self.workers.clear();

        let (ready, blocked, joining) = shared.run_queue.update(|queue| {
            (
                std::mem::take(&mut queue.ready),
                std::mem::take(&mut queue.blocked),
                std::mem::take(&mut queue.joining),
            )
        });
        let abandoned: Vec<_> = ready
            .into_iter()
            .chain(blocked.into_values())
            .chain(joining.into_values())
            .collect();
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "abandoning unfinished tasks");
        }
        for task in abandoned {
            task.abandon();
        }

        shared.run_queue.destroy();
        shared.timer.stop();
        debug!("scheduler stopped");
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let shared = self.handle.shared();
        let (ready, blocked, joining) = shared.run_queue.with_shared(|queue| {
            (queue.ready.len(), queue.blocked.len(), queue.joining.len())
        });
        SchedulerStats {
            tasks_started: shared.tasks_started.load(Ordering::Relaxed),
            tasks_finished: shared.tasks_finished.load(Ordering::Relaxed),
            ready,
            blocked,
            joining,
            active_executors: shared.active_executors.load(Ordering::Acquire),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("worker_count", &self.worker_count)
            .field("started", &self.started)
            .field("stopped", &self.stopped)
            .finish()
    }
}
