//! # Prometheus Dispatch
//!
//! Priority/delay dispatch queue and worker pool for a workflow coordinator.
//!
//! Coordinator logic produces units of work (action starts, input checks,
//! bundle transitions, housekeeping) faster than it can execute them. This
//! crate orders that work and hands it to a fixed set of worker threads.
//!
//! ## Key Features
//!
//! - **Priority levels**: `priorities` FIFO buckets, highest served first
//! - **Delayed readiness**: an element is invisible until its delay elapses
//! - **Anti-starvation**: elements waiting longer than `max_wait` in one level
//!   are promoted one level per sweep, so low-priority work always finishes
//! - **Bounded capacity**: offers beyond `max_size` are refused, not blocked
//! - **Worker pool**: OS threads with their own tokio runtimes, cooperative
//!   interruption through the task's interrupt flag
//! - **Collaborators**: action store commands, retry classification over
//!   error chains and a topic-based status notifier
//!
//! ## Queue
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use prometheus_dispatch::core::{DispatchQueue, PriorityDelayQueue, ScheduledTask, TaskKind, TaskMetadata, UNBOUNDED};
//!
//! let queue = PriorityDelayQueue::new(3, Duration::from_secs(30), UNBOUNDED).unwrap();
//! let dispatch = DispatchQueue::new(queue);
//!
//! let meta = TaskMetadata::new("action.check", TaskKind::CoordinatorAction, "0000007-C@3");
//! dispatch.submit(Arc::new(ScheduledTask::new(meta, ())), 2, Duration::ZERO).unwrap();
//!
//! let next = dispatch.try_take().unwrap();
//! assert_eq!(next.meta().key, "action.check_0000007-C@3");
//! ```
//!
//! ## Worker Pool
//!
//! ```rust,ignore
//! use prometheus_dispatch::builders::build_dispatcher;
//! use prometheus_dispatch::config::DispatcherConfig;
//!
//! let dispatcher = build_dispatcher(DispatcherConfig::from_env()?, my_executor)?;
//! dispatcher.pool.submit(task, 1, Duration::from_millis(250))?;
//! for outcome in dispatcher.pool.completions() {
//!     publisher.publish_outcome(&outcome)?;
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Tasks, the priority/delay queue, retry classification and the worker pool.
pub mod core;
/// Configuration models for the queue, worker pool and retry policy.
pub mod config;
/// Builders to construct dispatch components from configuration.
pub mod builders;
/// Infrastructure adapters for action persistence and notifications.
pub mod infra;
/// Shared utilities.
pub mod util;
