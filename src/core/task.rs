//! The capability a schedulable unit of work exposes to the dispatch queue.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::clock::now_ms;

/// What the dispatch queue and worker pool need to know about a unit of work.
///
/// Identity accessors are read-only. The interrupt flag is the only mutable
/// state and takes `&self` so a dispatcher holding a shared handle can request
/// cooperative cancellation of a task that is already executing.
pub trait Task: Send + Sync {
    /// Human-readable command name.
    fn name(&self) -> &str;
    /// Task type used for grouping and metrics.
    fn task_type(&self) -> &str;
    /// Creation time in milliseconds since epoch.
    fn created_time(&self) -> u128;
    /// Unique key of this task.
    fn key(&self) -> &str;
    /// Key of the entity (job, action) the task operates on.
    fn entity_key(&self) -> &str;
    /// Priority the producer would like the task to run with.
    fn priority(&self) -> i32;
    /// Request (or withdraw a request for) cooperative interruption.
    fn set_interrupt_mode(&self, mode: bool);
    /// Whether interruption has been requested.
    fn in_interrupt_mode(&self) -> bool;
}

/// Closed set of task kinds produced by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Start, end, kill or check of a workflow action.
    WorkflowAction,
    /// Materialization, input check or start of a coordinator action.
    CoordinatorAction,
    /// Bundle lifecycle transitions.
    Bundle,
    /// Purge, recovery and other housekeeping.
    Maintenance,
}

impl TaskKind {
    /// Stable string form, also returned by [`Task::task_type`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowAction => "workflow_action",
            Self::CoordinatorAction => "coordinator_action",
            Self::Bundle => "bundle",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Command name.
    pub name: String,
    /// Task kind.
    pub kind: TaskKind,
    /// Unique task key.
    pub key: String,
    /// Key of the entity the task operates on.
    pub entity_key: String,
    /// Priority hint.
    pub priority: i32,
    /// Creation timestamp in milliseconds since epoch.
    pub created_at_ms: u128,
}

impl TaskMetadata {
    /// Metadata for `name` acting on `entity_key`. The task key is
    /// `"{name}_{entity_key}"`.
    pub fn new(name: impl Into<String>, kind: TaskKind, entity_key: impl Into<String>) -> Self {
        let name = name.into();
        let entity_key = entity_key.into();
        Self {
            key: format!("{name}_{entity_key}"),
            name,
            kind,
            entity_key,
            priority: 0,
            created_at_ms: now_ms(),
        }
    }

    /// Metadata for a task not bound to a persisted entity; a random entity
    /// key is generated.
    pub fn anonymous(name: impl Into<String>, kind: TaskKind) -> Self {
        Self::new(name, kind, Uuid::new_v4().to_string())
    }

    /// Set the priority hint.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Override the generated task key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

/// A task with metadata and caller-supplied payload.
#[derive(Debug)]
pub struct ScheduledTask<P> {
    meta: TaskMetadata,
    payload: P,
    interrupt: AtomicBool,
}

impl<P> ScheduledTask<P> {
    /// Wrap `payload` with its metadata.
    pub const fn new(meta: TaskMetadata, payload: P) -> Self {
        Self {
            meta,
            payload,
            interrupt: AtomicBool::new(false),
        }
    }

    /// Task metadata.
    pub const fn meta(&self) -> &TaskMetadata {
        &self.meta
    }

    /// Task payload.
    pub const fn payload(&self) -> &P {
        &self.payload
    }
}

impl<P: Send + Sync> Task for ScheduledTask<P> {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn task_type(&self) -> &str {
        self.meta.kind.as_str()
    }

    fn created_time(&self) -> u128 {
        self.meta.created_at_ms
    }

    fn key(&self) -> &str {
        &self.meta.key
    }

    fn entity_key(&self) -> &str {
        &self.meta.entity_key
    }

    fn priority(&self) -> i32 {
        self.meta.priority
    }

    fn set_interrupt_mode(&self, mode: bool) {
        self.interrupt.store(mode, Ordering::Release);
    }

    fn in_interrupt_mode(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_key() {
        let meta = TaskMetadata::new("action.start", TaskKind::WorkflowAction, "0000001-W@a");
        assert_eq!(meta.key, "action.start_0000001-W@a");
        assert_eq!(meta.priority, 0);

        let meta = meta.with_priority(2).with_key("custom");
        assert_eq!(meta.key, "custom");
        assert_eq!(meta.priority, 2);
    }

    #[test]
    fn test_anonymous_keys_are_unique() {
        let a = TaskMetadata::anonymous("purge", TaskKind::Maintenance);
        let b = TaskMetadata::anonymous("purge", TaskKind::Maintenance);
        assert_ne!(a.entity_key, b.entity_key);
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_task_accessors_and_interrupt() {
        let meta = TaskMetadata::new("coord.input", TaskKind::CoordinatorAction, "c-1@3");
        let task = ScheduledTask::new(meta, 42_u32);
        assert_eq!(task.name(), "coord.input");
        assert_eq!(task.task_type(), "coordinator_action");
        assert_eq!(task.entity_key(), "c-1@3");
        assert_eq!(*task.payload(), 42);

        assert!(!task.in_interrupt_mode());
        task.set_interrupt_mode(true);
        assert!(task.in_interrupt_mode());
        task.set_interrupt_mode(false);
        assert!(!task.in_interrupt_mode());
    }
}
