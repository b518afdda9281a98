//! Builds the dispatch queue and its worker pool from one configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::DispatcherConfig;
use crate::core::{DispatchQueue, ScheduledTask, SchedulerError, TaskExecutor, WorkerPool};

/// Shared queue plus the running pool draining it.
pub struct Dispatcher<P, R, E>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
    E: TaskExecutor<P, R>,
{
    /// Queue producers submit to.
    pub queue: Arc<DispatchQueue<ScheduledTask<P>>>,
    /// Pool consuming the queue.
    pub pool: WorkerPool<P, R, E>,
}

/// Validate `cfg`, create the queue and start a worker pool on it.
///
/// # Errors
///
/// - `SchedulerError::InvalidConfig` if `cfg` fails validation
/// - `SchedulerError::InvalidArgument` if the queue rejects its parameters
/// - `SchedulerError::Internal` if a worker cannot be spawned
pub fn build_dispatcher<P, R, E>(
    cfg: DispatcherConfig,
    executor: E,
) -> Result<Dispatcher<P, R, E>, SchedulerError>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
    E: TaskExecutor<P, R>,
{
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))?;

    let queue = Arc::new(DispatchQueue::from_config(&cfg.queue)?);
    info!(
        priorities = cfg.queue.priorities,
        max_wait_ms = cfg.queue.max_wait_ms,
        max_size = cfg.queue.max_size,
        "dispatch queue created"
    );
    let pool = WorkerPool::new(cfg, Arc::clone(&queue), executor)?;
    Ok(Dispatcher { queue, pool })
}
