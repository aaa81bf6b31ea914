// Disseminator - Single-writer actor for outbound gossip
//
// Every call into a gossip channel's send path goes through here, so the
// substrate is never entered from two call sites at once.
// - One worker task, strict FIFO
// - Bounded queue, drop-oldest on overflow; submit never blocks
// - Shutdown stops the worker and waits for it to exit

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A unit of outbound work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Actor errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActorError {
    #[error("Actor already started")]
    AlreadyStarted,

    #[error("Actor stopped")]
    Stopped,

    #[error("No async runtime available to run the worker")]
    NoRuntime,
}

/// Configuration for the dissemination actor
#[derive(Clone, Debug)]
pub struct ActorConfig {
    /// Maximum queued tasks before the oldest is dropped
    pub capacity: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

impl ActorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// What happened to a submitted task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Queued behind existing work
    Queued,
    /// Queued, and the oldest queued task was dropped to make room
    DisplacedOldest,
}

/// Statistics about the actor
#[derive(Clone, Debug, Default)]
pub struct ActorStats {
    pub submitted: u64,
    pub executed: u64,
    pub dropped: u64,
    pub panicked: u64,
}

struct QueueState {
    tasks: VecDeque<Task>,
    closed: bool,
    stats: ActorStats,
}

struct TaskQueue {
    state: Mutex<QueueState>,
    wake: Notify,
    capacity: usize,
}

impl TaskQueue {
    /// Next task, or None once closed
    fn next(&self) -> Option<Option<Task>> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        Some(state.tasks.pop_front())
    }

    fn record(&self, update: impl FnOnce(&mut ActorStats)) {
        update(&mut self.state.lock().stats);
    }
}

/// The dissemination actor
pub struct Disseminator {
    queue: Arc<TaskQueue>,
    worker: Option<JoinHandle<()>>,
}

impl Default for Disseminator {
    fn default() -> Self {
        Self::new(ActorConfig::default())
    }
}

impl Disseminator {
    /// Create an actor. Tasks can be submitted before start.
    pub fn new(config: ActorConfig) -> Self {
        Self {
            queue: Arc::new(TaskQueue {
                state: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    closed: false,
                    stats: ActorStats::default(),
                }),
                wake: Notify::new(),
                capacity: config.capacity.max(1),
            }),
            worker: None,
        }
    }

    /// Check if the worker is running
    pub fn is_running(&self) -> bool {
        self.worker.is_some() && !self.queue.state.lock().closed
    }

    /// Number of queued tasks
    pub fn queued(&self) -> usize {
        self.queue.state.lock().tasks.len()
    }

    /// Get statistics
    pub fn stats(&self) -> ActorStats {
        self.queue.state.lock().stats.clone()
    }

    /// Spawn the worker on the current tokio runtime
    pub fn start(&mut self) -> Result<(), ActorError> {
        if self.worker.is_some() {
            return Err(ActorError::AlreadyStarted);
        }
        if self.queue.state.lock().closed {
            return Err(ActorError::Stopped);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ActorError::NoRuntime)?;

        let queue = Arc::clone(&self.queue);
        self.worker = Some(runtime.spawn(run_worker(queue)));
        debug!("dissemination worker started");
        Ok(())
    }

    /// Queue a task. Never blocks.
    pub fn submit(&self, task: Task) -> Result<SubmitOutcome, ActorError> {
        let outcome = {
            let mut state = self.queue.state.lock();
            if state.closed {
                return Err(ActorError::Stopped);
            }

            let mut outcome = SubmitOutcome::Queued;
            if state.tasks.len() >= self.queue.capacity {
                state.tasks.pop_front();
                state.stats.dropped += 1;
                outcome = SubmitOutcome::DisplacedOldest;
            }
            state.tasks.push_back(task);
            state.stats.submitted += 1;
            outcome
        };

        if outcome == SubmitOutcome::DisplacedOldest {
            warn!(capacity = self.queue.capacity, "dissemination queue full, dropped oldest task");
        }
        self.queue.wake.notify_one();
        Ok(outcome)
    }

    /// Stop accepting work and wait for the worker to exit.
    ///
    /// Tasks still queued are discarded. Not reentrant: call once.
    pub async fn shutdown(&mut self) {
        let discarded = {
            let mut state = self.queue.state.lock();
            state.closed = true;
            let discarded = state.tasks.len() as u64;
            state.tasks.clear();
            state.stats.dropped += discarded;
            discarded
        };
        self.queue.wake.notify_one();

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!(error = %e, "dissemination worker ended abnormally");
            }
        }
        debug!(discarded, "dissemination worker stopped");
    }
}

async fn run_worker(queue: Arc<TaskQueue>) {
    while let Some(next) = queue.next() {
        match next {
            Some(task) => {
                if catch_unwind(AssertUnwindSafe(task)).is_ok() {
                    queue.record(|s| s.executed += 1);
                } else {
                    queue.record(|s| s.panicked += 1);
                    error!("dissemination task panicked");
                }
            }
            None => queue.wake.notified().await,
        }
    }
}
