//! Native implementation of `WorkerPool` using OS threads.
//!
//! Each worker owns a single-threaded tokio runtime and polls the shared
//! dispatch queue. Completed tasks are published on an unbounded
//! crossbeam channel; callers that never drain [`WorkerPool::completions`]
//! will accumulate outcomes in memory.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::core::executor::TaskExecutor;
use crate::core::{DispatchQueue, ScheduledTask, SchedulerError, Task};

use super::{outcome, PoolCounters, PoolStats, TaskOutcome};

type InFlight<P> = RwLock<HashMap<String, Arc<ScheduledTask<P>>>>;

/// Everything a worker thread shares with the pool.
struct WorkerContext<P, R, E> {
    queue: Arc<DispatchQueue<ScheduledTask<P>>>,
    in_flight: Arc<InFlight<P>>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
    outcomes: Sender<TaskOutcome<R>>,
    executor: E,
    poll_floor: Duration,
    poll_ceiling: Duration,
}

/// Worker pool with dedicated OS threads draining a dispatch queue.
pub struct WorkerPool<P, R, E>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
    E: TaskExecutor<P, R>,
{
    config: DispatcherConfig,
    queue: Arc<DispatchQueue<ScheduledTask<P>>>,
    in_flight: Arc<InFlight<P>>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    outcomes: Receiver<TaskOutcome<R>>,
    _executor: PhantomData<E>,
}

impl<P, R, E> WorkerPool<P, R, E>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
    E: TaskExecutor<P, R>,
{
    /// Start `config.worker_count` workers draining `queue`.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if the configuration is invalid
    /// - `SchedulerError::Internal` if a worker thread cannot be spawned
    pub fn new(
        config: DispatcherConfig,
        queue: Arc<DispatchQueue<ScheduledTask<P>>>,
        executor: E,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let (outcomes_tx, outcomes_rx) = unbounded();
        let in_flight = Arc::new(RwLock::new(HashMap::new()));
        let counters = Arc::new(PoolCounters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let ctx = WorkerContext {
                queue: Arc::clone(&queue),
                in_flight: Arc::clone(&in_flight),
                counters: Arc::clone(&counters),
                shutdown: Arc::clone(&shutdown),
                outcomes: outcomes_tx.clone(),
                executor: executor.clone(),
                poll_floor: Duration::from_millis(config.poll_interval_ms),
                poll_ceiling: Duration::from_millis(config.max_poll_interval_ms),
            };
            match spawn_worker(worker_id, ctx, config.thread_stack_size) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shutdown.store(true, Ordering::Release);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(SchedulerError::Internal(format!(
                        "failed to spawn worker {worker_id}: {e}"
                    )));
                }
            }
        }

        info!(
            worker_count = config.worker_count,
            priorities = queue.queue().priorities(),
            max_size = queue.queue().max_size(),
            "worker pool started"
        );

        Ok(Self {
            config,
            queue,
            in_flight,
            counters,
            shutdown,
            workers: Mutex::new(workers),
            outcomes: outcomes_rx,
            _executor: PhantomData,
        })
    }

    /// Enqueue `task` at `priority`, eligible after `delay`.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::PoolShutdown` after [`shutdown`](Self::shutdown)
    /// - `SchedulerError::QueueFull` if the queue is at capacity
    /// - `SchedulerError::InvalidArgument` for an out-of-range priority
    pub fn submit(
        &self,
        task: Arc<ScheduledTask<P>>,
        priority: i32,
        delay: Duration,
    ) -> Result<(), SchedulerError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::PoolShutdown);
        }
        let key = task.key().to_owned();
        if self.queue.submit(task, priority, delay)? {
            self.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
            Err(SchedulerError::QueueFull(key))
        }
    }

    /// Ask the task with `key` to stop.
    ///
    /// Sets the interrupt flag of the running task with that key, or of the
    /// matching queued task if none is running. Returns whether a task was
    /// found; the executor decides when to honour the request.
    pub fn cancel(&self, key: &str) -> bool {
        if let Some(task) = self.in_flight.read().get(key) {
            task.set_interrupt_mode(true);
            debug!(task = key, "interrupt requested for running task");
            return true;
        }
        match self.queue.queue().find_task(|task| task.key() == key) {
            Some(task) => {
                task.set_interrupt_mode(true);
                debug!(task = key, "interrupt requested for queued task");
                true
            }
            None => false,
        }
    }

    /// Receiver of task outcomes. All clones share one stream.
    pub fn completions(&self) -> Receiver<TaskOutcome<R>> {
        self.outcomes.clone()
    }

    /// The queue this pool drains.
    pub const fn queue(&self) -> &Arc<DispatchQueue<ScheduledTask<P>>> {
        &self.queue
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut stats = self.counters.snapshot(self.config.worker_count);
        stats.queued_tasks = self.queue.len() as u64;
        stats.occupancy = self.queue.occupancy();
        stats
    }

    /// Stop the workers and wait up to two seconds for each to exit.
    ///
    /// Tasks still queued stay in the queue; a running task finishes first.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("shutting down worker pool");

        let mut workers = self.workers.lock();
        let worker_count = workers.len();

        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });

            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(true) => debug!(worker_id = idx, "worker joined"),
                Ok(false) => warn!(worker_id = idx, "worker panicked"),
                Err(_) => {
                    warn!(worker_id = idx, "worker did not exit within timeout, detaching");
                    continue;
                }
            }
            let _ = join_thread.join();
        }

        info!(worker_count, left_in_queue = self.queue.len(), "worker pool shut down");
    }
}

impl<P, R, E> Drop for WorkerPool<P, R, E>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
    E: TaskExecutor<P, R>,
{
    fn drop(&mut self) {
        // Workers notice the flag on their next poll; joining is left to shutdown().
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            debug!("worker pool dropped without explicit shutdown, workers detached");
        }
    }
}

fn spawn_worker<P, R, E>(
    worker_id: usize,
    ctx: WorkerContext<P, R, E>,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
    E: TaskExecutor<P, R>,
{
    thread::Builder::new()
        .name(format!("dispatch-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || run_worker(worker_id, &ctx))
}

fn run_worker<P, R, E>(worker_id: usize, ctx: &WorkerContext<P, R, E>)
where
    P: Send + Sync + 'static,
    R: Send + 'static,
    E: TaskExecutor<P, R>,
{
    debug!(worker_id, "worker thread started");

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker_id, error = %e, "failed to create worker runtime");
            return;
        }
    };

    let mut idle = ctx.poll_floor;
    while !ctx.shutdown.load(Ordering::Acquire) {
        let Some(task) = ctx.queue.try_take() else {
            thread::sleep(idle);
            idle = idle.saturating_mul(2).min(ctx.poll_ceiling);
            continue;
        };
        idle = ctx.poll_floor;

        let key = task.key().to_owned();
        ctx.counters.active_tasks.fetch_add(1, Ordering::Relaxed);
        ctx.in_flight.write().insert(key.clone(), Arc::clone(&task));

        debug!(worker_id, task = %key, "executing task");
        let result = rt.block_on(ctx.executor.execute(Arc::clone(&task)));

        {
            let mut in_flight = ctx.in_flight.write();
            if in_flight.get(&key).is_some_and(|t| Arc::ptr_eq(t, &task)) {
                in_flight.remove(&key);
            }
        }
        let interrupted = task.in_interrupt_mode();
        ctx.counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
        ctx.counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
        if interrupted {
            ctx.counters.interrupted_tasks.fetch_add(1, Ordering::Relaxed);
        }
        debug!(worker_id, task = %key, interrupted, "task finished");

        let meta = task.meta();
        let done = outcome(key, meta.name.clone(), meta.kind, worker_id, interrupted, result);
        if ctx.outcomes.send(done).is_err() {
            debug!(worker_id, "completion receiver dropped");
        }
    }

    debug!(worker_id, "worker thread exiting");
}
