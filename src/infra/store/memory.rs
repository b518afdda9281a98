//! In-memory action store for development and tests.

use std::collections::{HashMap, VecDeque};

use parking_lot::{Mutex, RwLock};

use crate::core::StoreError;

use super::{ActionState, ActionStore};

/// Action store kept in a hash map.
///
/// Failures can be queued with [`fail_next`](Self::fail_next); each call to the
/// store consumes one before touching the data.
#[derive(Debug, Default)]
pub struct InMemoryActionStore {
    actions: RwLock<HashMap<String, ActionState>>,
    failures: Mutex<VecDeque<StoreError>>,
}

impl InMemoryActionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an action.
    pub fn insert(&self, action_id: impl Into<String>, state: ActionState) {
        self.actions.write().insert(action_id.into(), state);
    }

    /// Current state of `action_id`.
    pub fn state(&self, action_id: &str) -> Option<ActionState> {
        self.actions.read().get(action_id).copied()
    }

    /// Number of stored actions.
    pub fn len(&self) -> usize {
        self.actions.read().len()
    }

    /// Whether the store holds no actions.
    pub fn is_empty(&self) -> bool {
        self.actions.read().is_empty()
    }

    /// Make the next store call fail with `err`.
    pub fn fail_next(&self, err: StoreError) {
        self.failures.lock().push_back(err);
    }
}

impl ActionStore for InMemoryActionStore {
    fn delete_unscheduled(&self, action_id: &str) -> Result<usize, StoreError> {
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        let mut actions = self.actions.write();
        match actions.get(action_id) {
            Some(state) if state.is_unscheduled() => {
                actions.remove(action_id);
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}
