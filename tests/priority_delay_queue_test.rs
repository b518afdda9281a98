//! Integration tests for `PriorityDelayQueue` and `DispatchQueue`.
//!
//! These tests validate:
//! - Priority ordering with FIFO tie-breaking
//! - Readiness delays
//! - Anti-starvation promotion timing
//! - Capacity limits and clearing
//! - Concurrent producers and consumers

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prometheus_dispatch::core::{
    DispatchQueue, PriorityDelayQueue, QueueElement, ScheduledTask, SchedulerError, Task, TaskKind,
    TaskMetadata, UNBOUNDED,
};
use prometheus_dispatch::util::clock::TimeUnit;
use rand::Rng;

type TestTask = ScheduledTask<u32>;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn task(name: &str, payload: u32) -> Arc<TestTask> {
    let meta = TaskMetadata::new(name, TaskKind::CoordinatorAction, format!("{payload:07}-C@1"));
    Arc::new(ScheduledTask::new(meta, payload))
}

fn element(name: &str, priority: usize) -> QueueElement<TestTask> {
    QueueElement::delayed(task(name, 0), priority, Duration::ZERO).unwrap()
}

fn queue(priorities: usize, max_wait_ms: u64, max_size: i64) -> PriorityDelayQueue<TestTask> {
    PriorityDelayQueue::new(priorities, Duration::from_millis(max_wait_ms), max_size).unwrap()
}

fn drain_names(q: &PriorityDelayQueue<TestTask>) -> Vec<String> {
    std::iter::from_fn(|| q.poll())
        .map(|e| e.task().name().to_owned())
        .collect()
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

#[test]
fn test_constructor_rejects_bad_parameters() {
    let wait = Duration::from_millis(100);
    assert!(matches!(
        PriorityDelayQueue::<TestTask>::new(0, wait, UNBOUNDED),
        Err(SchedulerError::InvalidArgument(_))
    ));
    assert!(PriorityDelayQueue::<TestTask>::new(3, Duration::ZERO, UNBOUNDED).is_err());
    assert!(PriorityDelayQueue::<TestTask>::new(3, wait, 0).is_err());
    assert!(PriorityDelayQueue::<TestTask>::new(3, wait, -2).is_err());

    let q = PriorityDelayQueue::<TestTask>::new(3, wait, 10).unwrap();
    assert_eq!(q.priorities(), 3);
    assert_eq!(q.max_size(), 10);
    assert_eq!(q.max_wait_in(TimeUnit::Milliseconds), 100);
}

#[test]
fn test_element_rejects_negative_values() {
    assert!(QueueElement::new(task("a", 0), -1, 0, TimeUnit::Milliseconds).is_err());
    assert!(QueueElement::new(task("a", 0), 0, -1, TimeUnit::Milliseconds).is_err());
    assert!(QueueElement::new(task("a", 0), 0, 0, TimeUnit::Milliseconds).is_ok());
}

#[test]
fn test_offer_rejects_out_of_range_priority() {
    let q = queue(2, 1_000, UNBOUNDED);
    assert!(matches!(q.offer(element("a", 2)), Err(SchedulerError::InvalidArgument(_))));
    assert!(q.is_empty());
}

// ============================================================================
// ORDERING
// ============================================================================

#[test]
fn test_priority_order_with_fifo_ties() {
    let q = queue(3, 60_000, UNBOUNDED);
    for (name, priority) in [("l1", 0), ("h1", 2), ("m1", 1), ("h2", 2), ("l2", 0), ("m2", 1)] {
        assert!(q.offer(element(name, priority)).unwrap());
    }
    assert_eq!(drain_names(&q), vec!["h1", "h2", "m1", "m2", "l1", "l2"]);
    assert!(q.is_empty());
}

#[test]
fn test_dispatch_example_sequence() {
    let q = DispatchQueue::new(queue(3, 60_000, UNBOUNDED));
    q.submit(task("A", 1), 2, Duration::ZERO).unwrap();
    q.submit(task("B", 2), 1, Duration::ZERO).unwrap();
    q.submit(task("C", 3), 0, Duration::ZERO).unwrap();

    let order: Vec<u32> = std::iter::from_fn(|| q.try_take()).map(|t| *t.payload()).collect();
    assert_eq!(order, vec![1, 2, 3]);

    q.submit(task("X", 4), 0, Duration::from_millis(10)).unwrap();
    assert!(q.try_take().is_none());
    thread::sleep(Duration::from_millis(15));
    assert_eq!(q.try_take().map(|t| *t.payload()), Some(4));
}

#[test]
fn test_peek_is_stable_and_non_mutating() {
    let q = queue(3, 60_000, UNBOUNDED);
    q.offer(element("a", 1)).unwrap();
    q.offer(element("b", 2)).unwrap();

    let first = q.peek().unwrap();
    let second = q.peek().unwrap();
    assert!(Arc::ptr_eq(first.task(), second.task()));
    assert_eq!(first.task().name(), "b");
    assert_eq!(q.size(), 2);

    let polled = q.poll().unwrap();
    assert!(Arc::ptr_eq(first.task(), polled.task()));
}

#[test]
fn test_iter_is_snapshot_in_dispatch_order() {
    let q = queue(3, 60_000, UNBOUNDED);
    q.offer(element("low", 0)).unwrap();
    q.offer(QueueElement::delayed(task("later", 0), 2, Duration::from_secs(60)).unwrap())
        .unwrap();
    q.offer(element("high", 2)).unwrap();

    let snapshot = q.iter();
    assert_eq!(snapshot.len(), 3);
    q.clear();

    let names: Vec<String> = snapshot.map(|e| e.task().name().to_owned()).collect();
    assert_eq!(names, vec!["high", "later", "low"]);
}

// ============================================================================
// DELAY
// ============================================================================

#[test]
fn test_delayed_element_invisible_until_ready() {
    let q = queue(3, 60_000, UNBOUNDED);
    let delayed = QueueElement::delayed(task("delayed", 0), 2, Duration::from_millis(100)).unwrap();
    q.offer(delayed).unwrap();
    q.offer(element("now", 0)).unwrap();

    assert_eq!(q.peek().unwrap().task().name(), "now");
    assert_eq!(q.poll().unwrap().task().name(), "now");
    assert!(q.poll().is_none());
    assert_eq!(q.size(), 1);

    thread::sleep(Duration::from_millis(120));
    let ready = q.poll().unwrap();
    assert_eq!(ready.task().name(), "delayed");
    assert!(ready.remaining_delay().is_zero());
}

#[test]
fn test_earlier_ready_wins_within_priority() {
    let q = queue(2, 60_000, UNBOUNDED);
    q.offer(QueueElement::delayed(task("slow", 0), 1, Duration::from_millis(40)).unwrap())
        .unwrap();
    q.offer(QueueElement::delayed(task("fast", 0), 1, Duration::from_millis(20)).unwrap())
        .unwrap();
    thread::sleep(Duration::from_millis(60));
    assert_eq!(drain_names(&q), vec!["fast", "slow"]);
}

// ============================================================================
// ANTI-STARVATION
// ============================================================================

#[test]
fn test_anti_starvation_promotes_one_level_per_max_wait() {
    let q = queue(3, 500, UNBOUNDED);
    q.offer(element("starving", 0)).unwrap();

    assert_eq!(q.peek().unwrap().priority(), 0);
    assert_eq!(q.sizes(), vec![1, 0, 0]);

    thread::sleep(Duration::from_millis(200));
    assert_eq!(q.peek().unwrap().priority(), 0);
    assert_eq!(q.sizes(), vec![1, 0, 0]);

    thread::sleep(Duration::from_millis(350));
    assert_eq!(q.peek().unwrap().priority(), 1);
    assert_eq!(q.sizes(), vec![0, 1, 0]);

    thread::sleep(Duration::from_millis(550));
    assert_eq!(q.peek().unwrap().priority(), 2);
    assert_eq!(q.sizes(), vec![0, 0, 1]);

    thread::sleep(Duration::from_millis(550));
    assert_eq!(q.peek().unwrap().priority(), 2);
    assert_eq!(q.sizes(), vec![0, 0, 1]);
    assert_eq!(q.size(), 1);
}

#[test]
fn test_promoted_element_overtakes_newer_work() {
    let q = queue(2, 100, UNBOUNDED);
    q.offer(element("old", 0)).unwrap();
    thread::sleep(Duration::from_millis(120));
    q.peek();
    q.offer(element("new", 1)).unwrap();

    assert_eq!(drain_names(&q), vec!["old", "new"]);
}

// ============================================================================
// CAPACITY
// ============================================================================

#[test]
fn test_bounded_capacity() {
    let q = queue(2, 60_000, 2);
    assert!(q.offer(element("a", 0)).unwrap());
    assert!(q.offer(element("b", 1)).unwrap());
    assert_eq!(q.remaining_capacity(), Some(0));
    assert!(!q.offer(element("c", 1)).unwrap());
    assert_eq!(q.size(), 2);

    q.poll().unwrap();
    assert!(q.offer(element("c", 1)).unwrap());
}

#[test]
fn test_requeueing_a_queued_element_is_rejected() {
    let q = queue(2, 60_000, 2);
    assert!(q.offer(element("a", 0)).unwrap());

    let queued = q.peek().unwrap();
    assert!(matches!(q.offer(queued), Err(SchedulerError::InvalidArgument(_))));
    q.peek();
    assert_eq!(q.size(), 1);
    assert_eq!(q.sizes().iter().sum::<usize>(), q.size());
    assert_eq!(q.iter().len(), 1);

    assert!(q.poll().is_some());
    assert!(q.poll().is_none());
    assert_eq!(q.size(), 0);
    assert!(q.offer(element("b", 0)).unwrap());
    assert!(q.offer(element("c", 1)).unwrap());
    assert!(!q.offer(element("d", 1)).unwrap());
}

#[test]
fn test_unbounded_always_admits() {
    let q = queue(3, 60_000, UNBOUNDED);
    for i in 0..5_000 {
        assert!(q.offer(element("x", i % 3)).unwrap());
    }
    assert_eq!(q.size(), 5_000);
    assert_eq!(q.remaining_capacity(), None);
}

#[test]
fn test_clear_empties_queue() {
    let q = queue(3, 60_000, 10);
    for i in 0..6 {
        q.offer(element("x", i % 3)).unwrap();
    }
    q.clear();
    assert!(q.is_empty());
    assert_eq!(q.sizes(), vec![0, 0, 0]);
    assert!(q.poll().is_none());
    assert_eq!(q.remaining_capacity(), Some(10));
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_producers_and_consumers() {
    const PRODUCERS: u32 = 4;
    const PER_PRODUCER: u32 = 500;
    const CONSUMERS: usize = 3;
    let total = (PRODUCERS * PER_PRODUCER) as usize;

    let q = DispatchQueue::new(queue(3, 5, UNBOUNDED));
    let seen = Mutex::new(HashSet::new());
    let taken = AtomicUsize::new(0);
    let deadline = Instant::now() + Duration::from_secs(20);

    thread::scope(|s| {
        for p in 0..PRODUCERS {
            let q = &q;
            s.spawn(move || {
                let mut rng = rand::rng();
                for i in 0..PER_PRODUCER {
                    let priority = rng.random_range(0..3);
                    let delay = Duration::from_micros(rng.random_range(0..500));
                    assert!(q.submit(task("work", p * PER_PRODUCER + i), priority, delay).unwrap());
                }
            });
        }
        for _ in 0..CONSUMERS {
            s.spawn(|| {
                while taken.load(Ordering::SeqCst) < total && Instant::now() < deadline {
                    match q.try_take() {
                        Some(t) => {
                            assert!(seen.lock().insert(*t.payload()), "duplicate delivery");
                            taken.fetch_add(1, Ordering::SeqCst);
                        }
                        None => thread::yield_now(),
                    }
                }
            });
        }
    });

    assert_eq!(seen.lock().len(), total);
    assert!(q.is_empty());
}

#[test]
fn test_promotion_under_contention_keeps_sizes_consistent() {
    const PRODUCERS: u32 = 4;
    const PER_PRODUCER: u32 = 300;
    let total = (PRODUCERS * PER_PRODUCER) as usize;

    let q = queue(4, 1, UNBOUNDED);
    let producers_done = AtomicUsize::new(0);

    thread::scope(|s| {
        for p in 0..PRODUCERS {
            let (q, producers_done) = (&q, &producers_done);
            s.spawn(move || {
                let mut rng = rand::rng();
                for i in 0..PER_PRODUCER {
                    let priority = rng.random_range(0..4);
                    let element = QueueElement::delayed(task("work", p * PER_PRODUCER + i), priority, Duration::ZERO).unwrap();
                    assert!(q.offer(element).unwrap());
                }
                producers_done.fetch_add(1, Ordering::SeqCst);
            });
        }
        for _ in 0..2 {
            s.spawn(|| {
                while producers_done.load(Ordering::SeqCst) < PRODUCERS as usize {
                    q.peek();
                    let snapshot: Vec<u32> = q.iter().map(|e| *e.task().payload()).collect();
                    let distinct: HashSet<u32> = snapshot.iter().copied().collect();
                    assert_eq!(distinct.len(), snapshot.len(), "element listed twice");
                    thread::sleep(Duration::from_micros(200));
                }
            });
        }
    });

    thread::sleep(Duration::from_millis(5));
    q.peek();
    assert_eq!(q.size(), total);
    assert_eq!(q.sizes().iter().sum::<usize>(), q.size());

    let drained: HashSet<u32> = std::iter::from_fn(|| q.poll()).map(|e| *e.task().payload()).collect();
    assert_eq!(drained.len(), total);
    q.peek();
    assert_eq!(q.sizes(), vec![0, 0, 0, 0]);
}

#[test]
fn test_clear_and_iter_race_with_offer_and_poll() {
    const PRODUCERS: u32 = 3;
    const PER_PRODUCER: u32 = 400;
    let total = (PRODUCERS * PER_PRODUCER) as usize;

    let q = queue(3, 1, UNBOUNDED);
    let seen = Mutex::new(HashSet::new());
    let producers_done = AtomicUsize::new(0);
    let deadline = Instant::now() + Duration::from_secs(20);

    thread::scope(|s| {
        for p in 0..PRODUCERS {
            let (q, producers_done) = (&q, &producers_done);
            s.spawn(move || {
                let mut rng = rand::rng();
                for i in 0..PER_PRODUCER {
                    let priority = rng.random_range(0..3);
                    let delay = Duration::from_micros(rng.random_range(0..200));
                    let element = QueueElement::delayed(task("work", p * PER_PRODUCER + i), priority, delay).unwrap();
                    assert!(q.offer(element).unwrap());
                }
                producers_done.fetch_add(1, Ordering::SeqCst);
            });
        }
        for _ in 0..2 {
            s.spawn(|| loop {
                let finished = producers_done.load(Ordering::SeqCst) == PRODUCERS as usize;
                match q.poll() {
                    Some(e) => assert!(seen.lock().insert(*e.task().payload()), "duplicate delivery"),
                    None if (finished && q.is_empty()) || Instant::now() > deadline => break,
                    None => thread::yield_now(),
                }
            });
        }
        s.spawn(|| {
            for round in 0..50 {
                assert!(q.iter().len() <= total);
                q.sizes();
                if round % 10 == 9 {
                    q.clear();
                }
                thread::sleep(Duration::from_micros(300));
            }
        });
    });

    assert!(seen.lock().len() <= total);
    q.peek();
    assert_eq!(q.size(), 0);
    assert_eq!(q.sizes().iter().sum::<usize>(), q.size());
}
