//! Queue elements: a task plus the metadata the queue ranks it by.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::SchedulerError;
use crate::util::clock::TimeUnit;

/// Process-wide insertion counter; gives every element a distinct FIFO rank.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_seq() -> u64 {
    NEXT_SEQ.fetch_add(1, AtomicOrdering::Relaxed)
}

/// A task wrapped with its scheduling metadata.
///
/// Elements are totally ordered: higher `priority` first, then earlier
/// `ready_at`, then earlier insertion. Sorting a `Vec<QueueElement<_>>`
/// ascending therefore yields dispatch order, and two distinct elements never
/// compare equal.
///
/// Cloning is cheap and shares the underlying task.
pub struct QueueElement<T: ?Sized> {
    task: Arc<T>,
    priority: usize,
    ready_at: Instant,
    seq: u64,
}

impl<T: ?Sized> QueueElement<T> {
    /// Wrap `task` at `priority`, eligible `delay` units from now.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidArgument` if `priority` or `delay` is negative,
    /// or if the delay does not fit in the monotonic clock.
    pub fn new(
        task: Arc<T>,
        priority: i32,
        delay: i64,
        unit: TimeUnit,
    ) -> Result<Self, SchedulerError> {
        let priority = usize::try_from(priority)
            .map_err(|_| SchedulerError::invalid(format!("priority must be >= 0, got {priority}")))?;
        let delay = u64::try_from(delay)
            .map_err(|_| SchedulerError::invalid(format!("delay must be >= 0, got {delay}")))?;
        Self::delayed(task, priority, unit.to_duration(delay))
    }

    /// Wrap `task` at priority 0 with no delay.
    pub fn immediate(task: Arc<T>) -> Self {
        Self {
            task,
            priority: 0,
            ready_at: Instant::now(),
            seq: next_seq(),
        }
    }

    /// Wrap `task` at `priority`, eligible after `delay`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidArgument` if `now + delay` overflows the clock.
    pub fn delayed(task: Arc<T>, priority: usize, delay: Duration) -> Result<Self, SchedulerError> {
        let ready_at = Instant::now()
            .checked_add(delay)
            .ok_or_else(|| SchedulerError::invalid(format!("delay {delay:?} is too large")))?;
        Ok(Self {
            task,
            priority,
            ready_at,
            seq: next_seq(),
        })
    }

    /// The wrapped task.
    pub const fn task(&self) -> &Arc<T> {
        &self.task
    }

    /// Consume the element, returning the task.
    pub fn into_task(self) -> Arc<T> {
        self.task
    }

    /// Priority bucket the element is currently assigned to.
    pub const fn priority(&self) -> usize {
        self.priority
    }

    pub(crate) fn set_priority(&mut self, priority: usize) {
        self.priority = priority;
    }

    /// Instant from which the element may be selected.
    pub const fn ready_at(&self) -> Instant {
        self.ready_at
    }

    /// Insertion sequence used as the final tie-break.
    pub const fn insertion_seq(&self) -> u64 {
        self.seq
    }

    /// Time left until the element becomes eligible; zero once it is.
    pub fn remaining_delay(&self) -> Duration {
        self.ready_at.saturating_duration_since(Instant::now())
    }

    /// [`remaining_delay`](Self::remaining_delay) expressed in `unit`.
    pub fn remaining_delay_in(&self, unit: TimeUnit) -> i64 {
        unit.convert(self.remaining_delay())
    }

    /// Whether the element is eligible at `now`.
    pub fn is_ready_at(&self, now: Instant) -> bool {
        self.ready_at <= now
    }
}

impl<T: ?Sized> Clone for QueueElement<T> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            priority: self.priority,
            ready_at: self.ready_at,
            seq: self.seq,
        }
    }
}

impl<T: ?Sized> fmt::Debug for QueueElement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueElement")
            .field("priority", &self.priority)
            .field("remaining_delay", &self.remaining_delay())
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> PartialEq for QueueElement<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: ?Sized> Eq for QueueElement<T> {}

impl<T: ?Sized> PartialOrd for QueueElement<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized> Ord for QueueElement<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority sorts first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.ready_at.cmp(&other.ready_at))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_rejects_negative_arguments() {
        let task = Arc::new("job");
        assert!(matches!(
            QueueElement::new(Arc::clone(&task), -1, 0, TimeUnit::Milliseconds),
            Err(SchedulerError::InvalidArgument(_))
        ));
        assert!(matches!(
            QueueElement::new(task, 0, -1, TimeUnit::Milliseconds),
            Err(SchedulerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_remaining_delay() {
        let e = QueueElement::immediate(Arc::new(1));
        assert_eq!(e.priority(), 0);
        assert!(e.remaining_delay_in(TimeUnit::Milliseconds) <= 0);

        let e = QueueElement::new(Arc::new(1), 1, 200, TimeUnit::Milliseconds).unwrap();
        assert_eq!(e.priority(), 1);
        let remaining = e.remaining_delay_in(TimeUnit::Milliseconds);
        assert!(remaining <= 200);
        assert!(remaining >= 100);
        thread::sleep(Duration::from_millis(300));
        assert_eq!(e.remaining_delay_in(TimeUnit::Milliseconds), 0);
        assert!(e.is_ready_at(Instant::now()));
    }

    #[test]
    fn test_higher_priority_sorts_first() {
        let high = QueueElement::new(Arc::new(1), 1, 200, TimeUnit::Milliseconds).unwrap();
        let low = QueueElement::immediate(Arc::new(2));
        assert!(high < low);
    }

    #[test]
    fn test_same_priority_orders_by_readiness_then_insertion() {
        let later = QueueElement::new(Arc::new(1), 0, 50, TimeUnit::Milliseconds).unwrap();
        let first = QueueElement::new(Arc::new(2), 0, 0, TimeUnit::Milliseconds).unwrap();
        assert!(first < later);

        let a = QueueElement::immediate(Arc::new(3));
        let b = a.clone();
        assert_eq!(a, b);

        let c = QueueElement::immediate(Arc::new(4));
        assert_ne!(a, c);
        assert!(a.insertion_seq() < c.insertion_seq());
    }

    #[test]
    fn test_sort_yields_dispatch_order() {
        let mut elements = vec![
            QueueElement::new(Arc::new("c"), 0, 0, TimeUnit::Milliseconds).unwrap(),
            QueueElement::new(Arc::new("a"), 2, 0, TimeUnit::Milliseconds).unwrap(),
            QueueElement::new(Arc::new("b"), 1, 0, TimeUnit::Milliseconds).unwrap(),
        ];
        elements.sort();
        let order: Vec<&str> = elements.iter().map(|e| **e.task()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
