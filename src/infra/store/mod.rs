//! Action persistence and the store-side commands the dispatcher issues.
//!
//! Backends implement [`ActionStore`]; commands implement [`StoreCommand`] and
//! translate backend failures into [`SchedulerError`]s so the retry layer can
//! classify them by kind.

pub mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{SchedulerError, StoreError};

pub use memory::InMemoryActionStore;

/// Lifecycle state of a persisted coordinator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Materialized, waiting for input dependencies.
    Waiting,
    /// Dependencies met, not yet handed to a worker.
    Ready,
    /// Handed to the workflow engine.
    Submitted,
    /// Executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Killed by a user or by the coordinator.
    Killed,
    /// Inputs did not arrive in time.
    TimedOut,
}

impl ActionState {
    /// Whether an action in this state may be deleted because no worker has
    /// picked it up yet.
    #[must_use]
    pub const fn is_unscheduled(self) -> bool {
        matches!(self, Self::Waiting | Self::Ready)
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Killed => "killed",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Storage backend for coordinator actions.
pub trait ActionStore: Send + Sync {
    /// Delete the action with `action_id` if it is still unscheduled.
    ///
    /// Returns the number of rows removed: 0 when the action does not exist
    /// or has already been scheduled.
    ///
    /// # Errors
    ///
    /// Any backend failure.
    fn delete_unscheduled(&self, action_id: &str) -> Result<usize, StoreError>;
}

/// A single unit of work executed against an [`ActionStore`].
pub trait StoreCommand<T> {
    /// Command name for logging.
    fn name(&self) -> &'static str;

    /// Run the command.
    ///
    /// # Errors
    ///
    /// Command-specific; see implementors.
    fn execute(&self, store: &dyn ActionStore) -> Result<T, SchedulerError>;
}

/// Removes a coordinator action that has not been scheduled yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveUnscheduledAction {
    action_id: String,
}

impl RemoveUnscheduledAction {
    /// Command for `action_id`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidArgument` if `action_id` is empty.
    pub fn new(action_id: impl Into<String>) -> Result<Self, SchedulerError> {
        let action_id = action_id.into();
        if action_id.is_empty() {
            return Err(SchedulerError::invalid("action id must not be empty"));
        }
        Ok(Self { action_id })
    }

    /// Target action.
    pub fn action_id(&self) -> &str {
        &self.action_id
    }
}

impl StoreCommand<()> for RemoveUnscheduledAction {
    fn name(&self) -> &'static str {
        "RemoveUnscheduledAction"
    }

    /// # Errors
    ///
    /// - `SchedulerError::Persistence` wrapping the backend failure
    /// - `SchedulerError::NotFound` if no unscheduled action matched
    fn execute(&self, store: &dyn ActionStore) -> Result<(), SchedulerError> {
        let deleted = store.delete_unscheduled(&self.action_id).map_err(|e| {
            warn!(action = %self.action_id, error = %e, "failed to delete unscheduled action");
            SchedulerError::persistence(format!("delete unscheduled action {}", self.action_id), e)
        })?;
        if deleted == 0 {
            return Err(SchedulerError::NotFound(self.action_id.clone()));
        }
        debug!(action = %self.action_id, deleted, "unscheduled action removed");
        Ok(())
    }
}
