use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;

/// The execution ids currently being worked on.
///
/// Cloning shares the underlying set. Ids are counted so that a duplicate
/// start for an id still running keeps it listed until both workers finish.
#[derive(Clone, Default)]
pub struct ExecutionRegistry {
    inner: Arc<Mutex<HashMap<String, usize>>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `execution_id`; it is removed again when the guard is dropped.
    pub fn track(&self, execution_id: &str) -> ExecutionGuard {
        let mut inner = self.inner.lock();
        let count = inner.entry(execution_id.to_string()).or_insert(0);
        if *count > 0 {
            warn!("Execution {} is already running; tracking it twice", execution_id);
        }
        *count += 1;

        ExecutionGuard {
            registry: self.clone(),
            execution_id: execution_id.to_string(),
        }
    }

    fn remove(&self, execution_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.get_mut(execution_id) {
            *count -= 1;
            if *count == 0 {
                inner.remove(execution_id);
            }
        }
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.inner.lock().contains_key(execution_id)
    }

    /// Sorted so heartbeats are stable across calls.
    pub fn snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Membership of one execution id in the registry.
pub struct ExecutionGuard {
    registry: ExecutionRegistry,
    execution_id: String,
}

impl ExecutionGuard {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.execution_id);
    }
}
