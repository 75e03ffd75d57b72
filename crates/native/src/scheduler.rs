//! Serialized disposal of native handles.
//!
//! Every destructive engine call goes through a [`Scheduler`]. The production
//! implementation, [`DisposalScheduler`], owns one dedicated worker thread fed
//! by a multi-producer channel, so teardown runs in FIFO order on a single
//! execution context no matter which thread released the last reference.
//!
//! ```text
//! caller threads ──release()──┐
//! caller threads ──release()──┼──▶ channel ──▶ worker thread ──▶ Engine::destroy
//! worker (cascade) ───────────┘        (FIFO)     (one context)
//! ```
//!
//! [`InlineScheduler`] runs tasks synchronously on the calling thread. It is
//! meant for tests that want disposal to be observable right after
//! `release()` returns.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, SendError, Sender};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::{EngineResult, ResourceKind};
use crate::error::{Error, Result};
use crate::resource::ResourceId;

// ---------------------------------------------------------------------------
// DisposalTask
// ---------------------------------------------------------------------------

type Job = Box<dyn FnOnce() -> EngineResult<()> + Send>;

/// One unit of teardown work.
///
/// Carries the identity of the resource being torn down so failures can be
/// attributed in logs.
pub struct DisposalTask {
    resource_id: ResourceId,
    kind: ResourceKind,
    job: Job,
}

impl DisposalTask {
    /// Create a task for `resource_id` that runs `job` on the scheduler.
    pub fn new<F>(resource_id: ResourceId, kind: ResourceKind, job: F) -> Self
    where
        F: FnOnce() -> EngineResult<()> + Send + 'static,
    {
        Self {
            resource_id,
            kind,
            job: Box::new(job),
        }
    }

    /// The resource this task tears down.
    #[must_use]
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    /// The kind of the resource this task tears down.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Run the job, containing engine errors and panics.
    fn execute(self) -> TaskOutcome {
        let Self {
            resource_id,
            kind,
            job,
        } = self;

        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => {
                tracing::trace!(resource_id = %resource_id, kind = %kind, "Teardown completed");
                TaskOutcome::Completed
            }
            Ok(Err(error)) => {
                tracing::warn!(
                    resource_id = %resource_id,
                    kind = %kind,
                    error = %error,
                    "Engine reported a teardown failure; continuing with the next task"
                );
                TaskOutcome::Failed
            }
            Err(_) => {
                tracing::error!(
                    resource_id = %resource_id,
                    kind = %kind,
                    "Teardown task panicked; continuing with the next task"
                );
                TaskOutcome::Failed
            }
        }
    }
}

impl std::fmt::Debug for DisposalTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposalTask")
            .field("resource_id", &self.resource_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    Failed,
}

// ---------------------------------------------------------------------------
// Scheduler trait
// ---------------------------------------------------------------------------

/// Serialized execution context for native teardown.
///
/// Injected into every [`Resource`](crate::Resource) and
/// [`Controller`](crate::Controller) at creation.
pub trait Scheduler: Send + Sync + 'static {
    /// Append a teardown task. Never blocks.
    fn enqueue(&self, task: DisposalTask);

    /// Number of tasks queued or currently running.
    fn pending(&self) -> usize;

    /// Block until no task is pending or `timeout` elapses.
    ///
    /// Returns `true` if the queue drained in time. This polls; it is a
    /// test and diagnostics primitive, not a synchronization mechanism for
    /// production code.
    fn drain_and_wait(&self, timeout: Duration) -> bool;
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

/// Configuration for [`DisposalScheduler`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    /// Name of the worker thread
    pub thread_name: String,
    /// Sleep between polls in `drain_and_wait`
    pub drain_poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: "nebula-disposal".to_string(),
            drain_poll_interval: Duration::from_millis(1),
        }
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.thread_name.is_empty() {
            return Err(Error::configuration("thread_name must not be empty"));
        }
        if self.thread_name.contains('\0') {
            return Err(Error::configuration(
                "thread_name must not contain NUL bytes",
            ));
        }
        if self.drain_poll_interval.is_zero() {
            return Err(Error::configuration(
                "drain_poll_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Scheduler statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total tasks ever enqueued.
    pub enqueued: u64,
    /// Tasks that ran to completion without error.
    pub completed: u64,
    /// Tasks whose engine call failed or panicked.
    pub failed: u64,
    /// Tasks queued or running right now.
    pub pending: usize,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    pending: AtomicUsize,
}

impl Counters {
    fn begin(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Record the outcome; `pending` drops last so a drained queue implies
    /// all outcomes are visible.
    fn finish(&self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
            TaskOutcome::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }

    fn wait_drained(&self, timeout: Duration, poll_interval: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(poll_interval.min(deadline - now));
        }
    }
}

// ---------------------------------------------------------------------------
// DisposalScheduler
// ---------------------------------------------------------------------------

enum Message {
    Dispose(DisposalTask),
    Shutdown,
}

/// Dedicated-thread FIFO scheduler for native teardown.
///
/// Dropping the scheduler lets the worker finish every task already queued
/// and then joins it.
pub struct DisposalScheduler {
    sender: Sender<Message>,
    counters: Arc<Counters>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
    config: SchedulerConfig,
}

impl DisposalScheduler {
    /// Start a scheduler with its worker thread.
    ///
    /// # Errors
    /// Returns error if `config` is invalid or the thread cannot be spawned.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = channel::unbounded();
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);

        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_worker(&receiver, &worker_counters))
            .map_err(|source| Error::WorkerSpawn {
                thread_name: config.thread_name.clone(),
                source,
            })?;
        let worker_id = worker.thread().id();

        tracing::debug!(thread_name = %config.thread_name, "Started disposal scheduler");

        Ok(Self {
            sender,
            counters,
            worker: Some(worker),
            worker_id,
            config,
        })
    }

    /// Start a scheduler with the default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(SchedulerConfig::default())
    }

    /// Whether the calling thread is this scheduler's worker.
    #[must_use]
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Snapshot of the scheduler counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }

    /// The configuration this scheduler was started with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl Scheduler for DisposalScheduler {
    fn enqueue(&self, task: DisposalTask) {
        self.counters.begin();
        if let Err(SendError(Message::Dispose(task))) = self.sender.send(Message::Dispose(task)) {
            // Only reachable once the worker has exited; the handle leaks
            // rather than being destroyed off the worker.
            tracing::error!(
                resource_id = %task.resource_id(),
                kind = %task.kind(),
                "Disposal worker is gone; dropping teardown task"
            );
            self.counters.finish(TaskOutcome::Failed);
        }
    }

    fn pending(&self) -> usize {
        self.counters.pending()
    }

    fn drain_and_wait(&self, timeout: Duration) -> bool {
        // The worker counts its own running task as pending.
        if self.is_worker_thread() {
            return self.counters.pending() == 0;
        }
        self.counters
            .wait_drained(timeout, self.config.drain_poll_interval)
    }
}

impl Drop for DisposalScheduler {
    fn drop(&mut self) {
        let _ = self.sender.send(Message::Shutdown);

        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.is_worker_thread() {
            // Last reference dropped by a task on the worker itself; the
            // loop exits after this task when it reads the shutdown message.
            return;
        }
        if worker.join().is_err() {
            tracing::error!(thread_name = %self.config.thread_name, "Disposal worker panicked");
        }
        tracing::debug!(thread_name = %self.config.thread_name, "Stopped disposal scheduler");
    }
}

impl std::fmt::Debug for DisposalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposalScheduler")
            .field("thread_name", &self.config.thread_name)
            .field("stats", &self.stats())
            .finish()
    }
}

fn run_worker(receiver: &Receiver<Message>, counters: &Counters) {
    for message in receiver {
        match message {
            Message::Dispose(task) => {
                let outcome = task.execute();
                counters.finish(outcome);
            }
            Message::Shutdown => break,
        }
    }
}

// ---------------------------------------------------------------------------
// InlineScheduler
// ---------------------------------------------------------------------------

/// Scheduler that runs each task on the thread that enqueued it.
///
/// Disposal is complete by the time `release()` returns, which makes
/// cascades directly observable in tests. Do not use it with an engine that
/// requires teardown from one consistent thread.
#[derive(Debug, Default)]
pub struct InlineScheduler {
    counters: Counters,
}

impl InlineScheduler {
    /// Create an inline scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the scheduler counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }
}

impl Scheduler for InlineScheduler {
    fn enqueue(&self, task: DisposalTask) {
        self.counters.begin();
        let outcome = task.execute();
        self.counters.finish(outcome);
    }

    fn pending(&self) -> usize {
        self.counters.pending()
    }

    fn drain_and_wait(&self, timeout: Duration) -> bool {
        self.counters
            .wait_drained(timeout, Duration::from_millis(1))
    }
}
