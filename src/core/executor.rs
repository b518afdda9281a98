//! Task execution trait used by the worker pool.

use std::sync::Arc;

use async_trait::async_trait;

use super::ScheduledTask;

/// Runs the business logic of a dequeued task.
///
/// The dispatch queue only orders work; an executor is where it happens. The
/// executor receives the shared task handle so it can poll
/// [`Task::in_interrupt_mode`](crate::core::Task::in_interrupt_mode) between
/// steps and stop early when the dispatcher asks it to.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use prometheus_dispatch::core::{ScheduledTask, Task, TaskExecutor};
///
/// #[derive(Clone)]
/// struct ActionStartExecutor;
///
/// struct ActionStart {
///     action_id: String,
///     steps: u32,
/// }
///
/// #[async_trait]
/// impl TaskExecutor<ActionStart, u32> for ActionStartExecutor {
///     async fn execute(&self, task: Arc<ScheduledTask<ActionStart>>) -> u32 {
///         let mut done = 0;
///         for _ in 0..task.payload().steps {
///             if task.in_interrupt_mode() {
///                 break;
///             }
///             done += 1;
///         }
///         done
///     }
/// }
/// ```
#[async_trait]
pub trait TaskExecutor<P, R>: Send + Sync + Clone + 'static
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Execute `task` and return its result.
    ///
    /// # Threading
    ///
    /// Called from a dedicated worker thread that drives its own
    /// current-thread tokio runtime, so blocking here only stalls that worker.
    async fn execute(&self, task: Arc<ScheduledTask<P>>) -> R;
}
