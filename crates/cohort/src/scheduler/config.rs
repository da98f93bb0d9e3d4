//! Scheduler configuration

use tracing::warn;

/// Environment variable overriding the executor count
pub const WORKERS_ENV: &str = "COHORT_WORKERS";

/// Environment variable overriding the executor stack size in bytes
pub const STACK_SIZE_ENV: &str = "COHORT_STACK_SIZE";

/// Configuration of a [`Scheduler`](crate::scheduler::Scheduler)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of executor threads (0 = one per CPU core)
    pub worker_count: usize,

    /// Prefix of executor thread names; executors are `{prefix}-{id}` and
    /// the timer is `{prefix}-timer`
    pub thread_name: String,

    /// Stack size of executor threads in bytes (None = platform default)
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            thread_name: "cohort-worker".to_string(),
            stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Configuration with a single executor
    pub fn restricted() -> Self {
        Self::default().with_workers(1)
    }

    /// Default configuration with overrides from `COHORT_WORKERS` and
    /// `COHORT_STACK_SIZE`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(workers) = parse_var(&lookup, WORKERS_ENV) {
            config.worker_count = workers;
        }
        if let Some(size) = parse_var(&lookup, STACK_SIZE_ENV) {
            config.stack_size = Some(size);
        }
        config
    }

    /// Set the number of executor threads
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the executor stack size in bytes
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Executor count with 0 resolved to the number of CPU cores
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get()
        } else {
            self.worker_count
        }
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, value = %raw, error = %err, "ignoring invalid scheduler setting");
            None
        }
    }
}
