//! Worker pool draining a [`DispatchQueue`](crate::core::DispatchQueue) on
//! dedicated OS threads.
//!
//! The queue never blocks, so workers poll it: after an empty poll a worker
//! sleeps for the configured poll interval, doubling the pause on each
//! further miss up to the ceiling, and resets to the floor as soon as it finds
//! work. Each worker drives its own current-thread tokio runtime so async
//! executors run without touching the caller's runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use prometheus_dispatch::config::DispatcherConfig;
//! use prometheus_dispatch::core::{DispatchQueue, ScheduledTask, TaskKind, TaskMetadata, WorkerPool};
//!
//! let cfg = DispatcherConfig::new().with_worker_count(4);
//! let queue = Arc::new(DispatchQueue::from_config(&cfg.queue)?);
//! let pool = WorkerPool::new(cfg, Arc::clone(&queue), my_executor)?;
//!
//! let meta = TaskMetadata::new("action.start", TaskKind::WorkflowAction, "0000001-W@a");
//! pool.submit(Arc::new(ScheduledTask::new(meta, job)), 1, Duration::ZERO)?;
//! let outcome = pool.completions().recv()?;
//! ```

#[cfg(not(target_arch = "wasm32"))]
mod native;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::TaskKind;
use crate::util::clock::now_ms;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Tasks currently executing.
    pub active_tasks: u64,
    /// Tasks waiting in the queue, ready or not.
    pub queued_tasks: u64,
    /// Queue occupancy per priority as of the last queue access.
    pub occupancy: Vec<usize>,
    /// Tasks accepted by [`WorkerPool::submit`].
    pub submitted_tasks: u64,
    /// Tasks refused because the queue was full.
    pub rejected_tasks: u64,
    /// Tasks whose executor returned.
    pub completed_tasks: u64,
    /// Completed tasks that had been asked to interrupt.
    pub interrupted_tasks: u64,
}

/// Internal counters for pool statistics.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_tasks: AtomicU64,
    pub submitted_tasks: AtomicU64,
    pub rejected_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub interrupted_tasks: AtomicU64,
}

impl PoolCounters {
    /// Snapshot of the counters; queue-derived fields are left for the caller.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            rejected_tasks: self.rejected_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            interrupted_tasks: self.interrupted_tasks.load(Ordering::Relaxed),
            ..PoolStats::default()
        }
    }
}

/// Result of one executed task, published on [`WorkerPool::completions`].
#[derive(Debug, Clone)]
pub struct TaskOutcome<R> {
    /// Task key.
    pub key: String,
    /// Task name.
    pub name: String,
    /// Task kind.
    pub kind: TaskKind,
    /// Worker that ran the task.
    pub worker_id: usize,
    /// Whether interruption had been requested by the time the executor returned.
    pub interrupted: bool,
    /// Completion time in milliseconds since epoch.
    pub finished_at_ms: u128,
    /// Executor result.
    pub result: R,
}

impl<R> TaskOutcome<R> {
    /// Serializable status summary, without the executor result.
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            key: self.key.clone(),
            name: self.name.clone(),
            kind: self.kind,
            state: if self.interrupted {
                CompletionState::Interrupted
            } else {
                CompletionState::Completed
            },
            finished_at_ms: self.finished_at_ms,
        }
    }
}

/// How a task left the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    /// The executor ran to completion.
    Completed,
    /// The executor returned after interruption was requested.
    Interrupted,
}

impl CompletionState {
    /// Stable string form, matching the serialized value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Status notification published after a task completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Task key.
    pub key: String,
    /// Task name.
    pub name: String,
    /// Task kind.
    pub kind: TaskKind,
    /// Completion state.
    pub state: CompletionState,
    /// Completion time in milliseconds since epoch.
    pub finished_at_ms: u128,
}

pub(crate) fn outcome<R>(
    key: String,
    name: String,
    kind: TaskKind,
    worker_id: usize,
    interrupted: bool,
    result: R,
) -> TaskOutcome<R> {
    TaskOutcome {
        key,
        name,
        kind,
        worker_id,
        interrupted,
        finished_at_ms: now_ms(),
        result,
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::WorkerPool;
