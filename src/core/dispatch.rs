//! Producer/consumer facade over [`PriorityDelayQueue`] that speaks in tasks
//! rather than queue elements.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::core::{PriorityDelayQueue, QueueElement, SchedulerError, Task};
use crate::util::clock::TimeUnit;

/// Dispatch queue shared between coordinator logic (producers) and the worker
/// pool (consumers).
#[derive(Debug)]
pub struct DispatchQueue<T: ?Sized> {
    queue: PriorityDelayQueue<T>,
}

impl<T: Task + ?Sized> DispatchQueue<T> {
    /// Wrap an existing queue.
    pub const fn new(queue: PriorityDelayQueue<T>) -> Self {
        Self { queue }
    }

    /// Build the underlying queue from configuration.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidArgument` for out-of-range queue parameters.
    pub fn from_config(cfg: &QueueConfig) -> Result<Self, SchedulerError> {
        PriorityDelayQueue::from_config(cfg).map(Self::new)
    }

    /// Enqueue `task` at `priority`, eligible after `delay`.
    ///
    /// Returns `Ok(false)` if the queue is at capacity.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidArgument` if `priority` is negative or not
    /// below the queue's number of priorities.
    pub fn submit(&self, task: Arc<T>, priority: i32, delay: Duration) -> Result<bool, SchedulerError> {
        let level = usize::try_from(priority)
            .map_err(|_| SchedulerError::invalid(format!("priority must be >= 0, got {priority}")))?;
        let key = task.key().to_owned();
        let admitted = self.queue.offer(QueueElement::delayed(task, level, delay)?)?;
        if admitted {
            debug!(task = %key, priority, delay_ms = delay.as_millis(), "task queued");
        } else {
            warn!(task = %key, priority, size = self.queue.size(), "dispatch queue full, task rejected");
        }
        Ok(admitted)
    }

    /// [`submit`](Self::submit) with the delay expressed as `delay` `unit`s.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidArgument` if `delay` is negative or `priority`
    /// is out of range.
    pub fn submit_in(
        &self,
        task: Arc<T>,
        priority: i32,
        delay: i64,
        unit: TimeUnit,
    ) -> Result<bool, SchedulerError> {
        let delay = u64::try_from(delay)
            .map_err(|_| SchedulerError::invalid(format!("delay must be >= 0, got {delay}")))?;
        self.submit(task, priority, unit.to_duration(delay))
    }

    /// Enqueue `task` immediately at its own priority hint, clamped to the
    /// highest level the queue has.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidArgument` if the hint is negative.
    pub fn submit_now(&self, task: Arc<T>) -> Result<bool, SchedulerError> {
        let top = i32::try_from(self.queue.priorities() - 1).unwrap_or(i32::MAX);
        let priority = task.priority().min(top);
        self.submit(task, priority, Duration::ZERO)
    }

    /// Remove and return the next ready task, if any.
    pub fn try_take(&self) -> Option<Arc<T>> {
        self.queue.poll().map(QueueElement::into_task)
    }

    /// Next ready task, left in the queue.
    pub fn peek_next(&self) -> Option<Arc<T>> {
        self.queue.peek().map(QueueElement::into_task)
    }

    /// Per-priority occupancy as of the last access.
    pub fn occupancy(&self) -> Vec<usize> {
        self.queue.sizes()
    }

    /// Number of queued tasks, ready or not.
    pub fn len(&self) -> usize {
        self.queue.size()
    }

    /// Whether no tasks are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Discard every queued task.
    pub fn clear(&self) {
        self.queue.clear();
    }

    /// The underlying queue.
    pub const fn queue(&self) -> &PriorityDelayQueue<T> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ScheduledTask, TaskKind, TaskMetadata, UNBOUNDED};

    fn make_task(name: &str, hint: i32) -> Arc<ScheduledTask<()>> {
        let meta = TaskMetadata::anonymous(name, TaskKind::WorkflowAction).with_priority(hint);
        Arc::new(ScheduledTask::new(meta, ()))
    }

    fn make_queue(priorities: usize, max_size: i64) -> DispatchQueue<ScheduledTask<()>> {
        let queue = PriorityDelayQueue::new(priorities, Duration::from_millis(500), max_size).unwrap();
        DispatchQueue::new(queue)
    }

    #[test]
    fn test_submit_and_take_in_priority_order() {
        let q = make_queue(3, UNBOUNDED);
        assert!(q.submit(make_task("a", 0), 2, Duration::ZERO).unwrap());
        assert!(q.submit(make_task("b", 0), 1, Duration::ZERO).unwrap());
        assert!(q.submit(make_task("c", 0), 0, Duration::ZERO).unwrap());

        let names: Vec<String> = std::iter::from_fn(|| q.try_take())
            .map(|t| t.name().to_owned())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_submit_rejects_negative_values() {
        let q = make_queue(3, UNBOUNDED);
        assert!(q.submit(make_task("a", 0), -1, Duration::ZERO).is_err());
        assert!(q.submit_in(make_task("a", 0), 0, -5, TimeUnit::Milliseconds).is_err());
        assert!(q.is_empty());
    }

    #[test]
    fn test_submit_full_returns_false() {
        let q = make_queue(1, 1);
        assert!(q.submit(make_task("a", 0), 0, Duration::ZERO).unwrap());
        assert!(!q.submit(make_task("b", 0), 0, Duration::ZERO).unwrap());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_submit_now_clamps_hint() {
        let q = make_queue(2, UNBOUNDED);
        assert!(q.submit_now(make_task("urgent", 9)).unwrap());
        q.peek_next();
        assert_eq!(q.occupancy(), vec![0, 1]);
        assert!(q.submit_now(make_task("bad", -1)).is_err());
    }

    #[test]
    fn test_peek_next_is_stable() {
        let q = make_queue(3, UNBOUNDED);
        q.submit(make_task("a", 0), 1, Duration::ZERO).unwrap();
        let first = q.peek_next().unwrap();
        let second = q.peek_next().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(q.len(), 1);
    }
}
