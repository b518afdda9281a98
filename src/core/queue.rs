//! Bounded priority queue with per-element readiness delay and anti-starvation
//! promotion.
//!
//! Every priority level owns a bucket ordered by readiness time then insertion
//! sequence. Selection walks the buckets from the highest priority down and
//! takes the first ready element it finds, so a bucket lookup is a single
//! `first_key_value` on a `BTreeMap`.
//!
//! Starvation is bounded lazily: each bucket also indexes its elements by the
//! instant they entered the bucket, and every peek or poll first moves the
//! elements that waited at least `max_wait` up one level. No background thread
//! is involved, which means [`PriorityDelayQueue::sizes`] is only as fresh as
//! the last access.
//!
//! All state lives behind one `parking_lot::Mutex`; promotion, removal,
//! admission and clearing are therefore atomic with respect to each other.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::QueueConfig;
use crate::core::{QueueElement, SchedulerError};
use crate::util::clock::TimeUnit;

/// Sentinel accepted by constructors for an unbounded queue.
pub const UNBOUNDED: i64 = -1;

type ReadyKey = (Instant, u64);
type EntryKey = (Instant, u64);

struct Entry<T: ?Sized> {
    element: QueueElement<T>,
    entered_at: Instant,
}

/// Elements of one priority level.
struct Bucket<T: ?Sized> {
    /// Selection order: readiness, then insertion.
    by_ready: BTreeMap<ReadyKey, Entry<T>>,
    /// Starvation order: time of entry into this bucket, mapped to readiness.
    by_entry: BTreeMap<EntryKey, Instant>,
}

impl<T: ?Sized> Bucket<T> {
    const fn new() -> Self {
        Self {
            by_ready: BTreeMap::new(),
            by_entry: BTreeMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.by_ready.len()
    }

    fn insert(&mut self, element: QueueElement<T>, entered_at: Instant) {
        let seq = element.insertion_seq();
        let ready_at = element.ready_at();
        self.by_entry.insert((entered_at, seq), ready_at);
        self.by_ready.insert((ready_at, seq), Entry { element, entered_at });
    }

    fn peek_ready(&self, now: Instant) -> Option<&QueueElement<T>> {
        self.by_ready
            .first_key_value()
            .map(|(_, entry)| &entry.element)
            .filter(|element| element.is_ready_at(now))
    }

    fn pop_ready(&mut self, now: Instant) -> Option<QueueElement<T>> {
        self.peek_ready(now)?;
        let ((_, seq), entry) = self.by_ready.pop_first()?;
        self.by_entry.remove(&(entry.entered_at, seq));
        Some(entry.element)
    }

    /// Detach the longest-waiting element if it entered at or before `deadline`.
    fn pop_overdue(&mut self, deadline: Instant) -> Option<QueueElement<T>> {
        let (&(entered_at, _), _) = self.by_entry.first_key_value()?;
        if entered_at > deadline {
            return None;
        }
        let ((_, seq), ready_at) = self.by_entry.pop_first()?;
        self.by_ready.remove(&(ready_at, seq)).map(|entry| entry.element)
    }

    fn contains(&self, element: &QueueElement<T>) -> bool {
        self.by_ready
            .contains_key(&(element.ready_at(), element.insertion_seq()))
    }

    fn clear(&mut self) {
        self.by_ready.clear();
        self.by_entry.clear();
    }

    fn elements(&self) -> impl Iterator<Item = &QueueElement<T>> {
        self.by_ready.values().map(|entry| &entry.element)
    }
}

struct QueueState<T: ?Sized> {
    buckets: Vec<Bucket<T>>,
    size: usize,
    /// Per-bucket occupancy as of the last sweep.
    sizes: Vec<usize>,
}

impl<T: ?Sized> QueueState<T> {
    fn refresh_sizes(&mut self) {
        for (slot, bucket) in self.sizes.iter_mut().zip(&self.buckets) {
            *slot = bucket.len();
        }
    }
}

/// Concurrent, non-blocking priority queue whose elements carry a readiness
/// delay.
///
/// Higher priority values are served first; within a priority, the earliest
/// ready element wins, then the earliest inserted. Elements not yet ready are
/// invisible to [`peek`](Self::peek) and [`poll`](Self::poll).
pub struct PriorityDelayQueue<T: ?Sized> {
    priorities: usize,
    max_wait: Duration,
    max_size: Option<usize>,
    state: Mutex<QueueState<T>>,
}

impl<T: ?Sized> PriorityDelayQueue<T> {
    /// Create a queue.
    ///
    /// * `priorities` - number of priority levels, `0..priorities`
    /// * `max_wait` - time an element may wait in a bucket before promotion
    /// * `max_size` - capacity, or [`UNBOUNDED`]
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidArgument` if `priorities == 0`, `max_wait` is
    /// zero, or `max_size` is neither `-1` nor positive.
    pub fn new(priorities: usize, max_wait: Duration, max_size: i64) -> Result<Self, SchedulerError> {
        if priorities == 0 {
            return Err(SchedulerError::invalid("priorities must be 1 or more"));
        }
        if max_wait.is_zero() {
            return Err(SchedulerError::invalid("max_wait must be greater than 0"));
        }
        let max_size = match max_size {
            UNBOUNDED => None,
            n if n >= 1 => Some(usize::try_from(n).map_err(|_| {
                SchedulerError::invalid(format!("max_size {n} exceeds addressable memory"))
            })?),
            n => {
                return Err(SchedulerError::invalid(format!(
                    "max_size must be -1 or greater than 0, got {n}"
                )))
            }
        };

        Ok(Self {
            priorities,
            max_wait,
            max_size,
            state: Mutex::new(QueueState {
                buckets: (0..priorities).map(|_| Bucket::new()).collect(),
                size: 0,
                sizes: vec![0; priorities],
            }),
        })
    }

    /// Create a queue from validated configuration.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn from_config(cfg: &QueueConfig) -> Result<Self, SchedulerError> {
        Self::new(cfg.priorities, Duration::from_millis(cfg.max_wait_ms), cfg.max_size)
    }

    /// Number of priority levels.
    pub const fn priorities(&self) -> usize {
        self.priorities
    }

    /// Capacity, or [`UNBOUNDED`].
    pub fn max_size(&self) -> i64 {
        self.max_size
            .map_or(UNBOUNDED, |n| i64::try_from(n).unwrap_or(i64::MAX))
    }

    /// Anti-starvation threshold.
    pub const fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Anti-starvation threshold expressed in `unit`.
    pub fn max_wait_in(&self, unit: TimeUnit) -> i64 {
        unit.convert(self.max_wait)
    }

    /// Insert `element` into the bucket of its priority.
    ///
    /// Returns `Ok(false)` without touching the queue if it is bounded and
    /// full. Never blocks beyond the internal critical section.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidArgument` if the element's priority is not
    /// below [`priorities`](Self::priorities), or if the element (or a clone
    /// of it) is already queued.
    pub fn offer(&self, element: QueueElement<T>) -> Result<bool, SchedulerError> {
        let priority = element.priority();
        if priority >= self.priorities {
            return Err(SchedulerError::invalid(format!(
                "priority {priority} out of range 0..{}",
                self.priorities
            )));
        }

        let mut state = self.state.lock();
        // A clone shares ready_at and seq; it may sit in any bucket after promotion.
        if state.buckets.iter().any(|bucket| bucket.contains(&element)) {
            return Err(SchedulerError::invalid(format!(
                "element {} already queued",
                element.insertion_seq()
            )));
        }
        if self.max_size.is_some_and(|max| state.size >= max) {
            debug!(size = state.size, priority, "queue full, element rejected");
            return Ok(false);
        }
        state.buckets[priority].insert(element, Instant::now());
        state.size += 1;
        trace!(size = state.size, priority, "element admitted");
        Ok(true)
    }

    /// Highest-ranked ready element, left in place.
    pub fn peek(&self) -> Option<QueueElement<T>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.promote_starved(&mut state, now);
        let element = state
            .buckets
            .iter()
            .rev()
            .find_map(|bucket| bucket.peek_ready(now))
            .cloned();
        element
    }

    /// Remove and return the highest-ranked ready element.
    pub fn poll(&self) -> Option<QueueElement<T>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.promote_starved(&mut state, now);
        let element = state
            .buckets
            .iter_mut()
            .rev()
            .find_map(|bucket| bucket.pop_ready(now))?;
        state.size -= 1;
        Some(element)
    }

    /// Number of live elements, ready or not.
    pub fn size(&self) -> usize {
        self.state.lock().size
    }

    /// Whether the queue holds no elements.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Free slots, or `None` when unbounded.
    pub fn remaining_capacity(&self) -> Option<usize> {
        let size = self.size();
        self.max_size.map(|max| max.saturating_sub(size))
    }

    /// Occupancy of each bucket, indexed by priority, as of the most recent
    /// peek, poll or clear. Meant for metrics, not for control decisions.
    pub fn sizes(&self) -> Vec<usize> {
        self.state.lock().sizes.clone()
    }

    /// Discard every element.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let dropped = state.size;
        for bucket in &mut state.buckets {
            bucket.clear();
        }
        state.size = 0;
        state.refresh_sizes();
        debug!(dropped, "queue cleared");
    }

    /// Snapshot of the held elements in dispatch order.
    ///
    /// The snapshot is taken under the lock, so it never shows a partially
    /// moved element; mutations after the call are not reflected.
    pub fn iter(&self) -> Iter<T> {
        let mut elements: Vec<QueueElement<T>> = {
            let state = self.state.lock();
            let held = state
                .buckets
                .iter()
                .flat_map(|bucket| bucket.elements())
                .cloned()
                .collect();
            held
        };
        elements.sort_unstable();
        Iter {
            inner: elements.into_iter(),
        }
    }

    /// First queued task matching `predicate`, ready or not, searched under
    /// the lock without copying the queue.
    pub fn find_task<F>(&self, mut predicate: F) -> Option<Arc<T>>
    where
        F: FnMut(&T) -> bool,
    {
        let state = self.state.lock();
        let found = state
            .buckets
            .iter()
            .flat_map(|bucket| bucket.elements())
            .find(|element| predicate(&**element.task()))
            .map(|element| Arc::clone(element.task()));
        found
    }

    /// Move every element that waited `max_wait` in bucket `p` to `p + 1`.
    ///
    /// Buckets are visited bottom-up and a promoted element re-enters with a
    /// fresh timer, so one sweep lifts an element by at most one level.
    fn promote_starved(&self, state: &mut QueueState<T>, now: Instant) {
        if let Some(deadline) = now.checked_sub(self.max_wait) {
            let mut promoted = 0_usize;
            for p in 0..self.priorities - 1 {
                while let Some(mut element) = state.buckets[p].pop_overdue(deadline) {
                    element.set_priority(p + 1);
                    state.buckets[p + 1].insert(element, now);
                    promoted += 1;
                }
            }
            if promoted > 0 {
                debug!(promoted, "promoted starved elements");
            }
        }
        state.refresh_sizes();
    }
}

impl<T: ?Sized> fmt::Debug for PriorityDelayQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityDelayQueue")
            .field("priorities", &self.priorities)
            .field("max_wait", &self.max_wait)
            .field("max_size", &self.max_size())
            .field("size", &self.size())
            .finish()
    }
}

impl<'a, T: ?Sized> IntoIterator for &'a PriorityDelayQueue<T> {
    type Item = QueueElement<T>;
    type IntoIter = Iter<T>;

    fn into_iter(self) -> Iter<T> {
        self.iter()
    }
}

/// Iterator over a [`PriorityDelayQueue`] snapshot.
pub struct Iter<T: ?Sized> {
    inner: std::vec::IntoIter<QueueElement<T>>,
}

impl<T: ?Sized> Iterator for Iter<T> {
    type Item = QueueElement<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T: ?Sized> ExactSizeIterator for Iter<T> {}
