//! Core dispatch abstractions: tasks, the priority/delay queue and the
//! worker pool that drains it.

pub mod dispatch;
pub mod element;
pub mod error;
pub mod executor;
pub mod queue;
pub mod retry;
pub mod task;
pub mod worker_pool;

pub use dispatch::DispatchQueue;
pub use element::QueueElement;
pub use error::{AppResult, SchedulerError, StoreError, TransportError};
pub use executor::TaskExecutor;
pub use queue::{Iter, PriorityDelayQueue, UNBOUNDED};
pub use retry::{
    classify, error_kinds, is_retryable, retry_with, ErrorKind, KindSetPredicate, RetryPolicy,
    RetryPredicate,
};
pub use task::{ScheduledTask, Task, TaskKind, TaskMetadata};
#[cfg(not(target_arch = "wasm32"))]
pub use worker_pool::WorkerPool;
pub use worker_pool::{CompletionState, PoolStats, TaskOutcome, TaskStatus};
