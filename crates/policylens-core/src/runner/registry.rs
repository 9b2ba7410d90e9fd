//! In-process registry of live executions, keyed by task identity.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::AbortHandle;

use crate::types::TaskIdentity;

struct Slot {
    task_id: String,
    abort: Option<AbortHandle>,
}

/// Holds one slot per non-terminal identity. The lock is never held across an
/// `.await`.
pub(crate) struct Registry {
    slots: Mutex<HashMap<TaskIdentity, Slot>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Registry({} live)", self.len())
    }
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<TaskIdentity, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `identity` for `task_id`. Returns `false` if it is already taken.
    pub(crate) fn reserve(&self, identity: TaskIdentity, task_id: &str) -> bool {
        let mut slots = self.slots();
        if slots.contains_key(&identity) {
            return false;
        }
        slots.insert(
            identity,
            Slot {
                task_id: task_id.to_owned(),
                abort: None,
            },
        );
        true
    }

    /// Record the abort handle of the execution that owns the slot. Ignored if
    /// the slot was already released or belongs to another task.
    pub(crate) fn attach(&self, identity: &TaskIdentity, task_id: &str, handle: AbortHandle) {
        if let Some(slot) = self.slots().get_mut(identity) {
            if slot.task_id == task_id {
                slot.abort = Some(handle);
            }
        }
    }

    pub(crate) fn release(&self, identity: &TaskIdentity, task_id: &str) {
        let mut slots = self.slots();
        if slots.get(identity).is_some_and(|slot| slot.task_id == task_id) {
            slots.remove(identity);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots().len()
    }

    /// Task ids and abort handles of every live execution.
    pub(crate) fn snapshot(&self) -> Vec<(String, Option<AbortHandle>)> {
        self.slots()
            .values()
            .map(|slot| (slot.task_id.clone(), slot.abort.clone()))
            .collect()
    }
}

/// Frees an identity when the execution that owns it ends, including when the
/// execution is aborted and its future dropped.
pub(crate) struct Reservation {
    registry: std::sync::Arc<Registry>,
    identity: TaskIdentity,
    task_id: String,
}

impl Reservation {
    pub(crate) fn new(registry: std::sync::Arc<Registry>, identity: TaskIdentity, task_id: String) -> Self {
        Self {
            registry,
            identity,
            task_id,
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.registry.release(&self.identity, &self.task_id);
    }
}
