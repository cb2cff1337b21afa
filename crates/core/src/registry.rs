//! Task registry contract and the in-memory implementation.
//!
//! The registry is the single shared mutable resource of the task service.
//! All mutation goes through [`TaskRegistry::update`], which applies one
//! [`Transition`] atomically per task id. Writers to different ids never
//! wait on each other, and no lock is held across a work function.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Deserialize;

use crate::task::{Task, TaskError, TaskId, TaskState, Transition};
use crate::types::DbId;

/// Maximum page size for task listing.
pub const MAX_LIMIT: i64 = 100;

/// Default page size for task listing.
pub const DEFAULT_LIMIT: i64 = 50;

/// Listing filter. `None` fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    pub owner: Option<DbId>,
    pub state: Option<TaskState>,
    pub project_id: Option<DbId>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TaskFilter {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    fn matches(&self, task: &Task) -> bool {
        self.owner.map_or(true, |owner| task.owner == owner)
            && self.state.map_or(true, |state| task.state == state)
            && self
                .project_id
                .map_or(true, |project| task.project_id == Some(project))
    }
}

/// Pluggable storage for task records.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Insert a new task. Fails with [`TaskError::DuplicateId`] if the id exists.
    async fn create(&self, task: Task) -> Result<(), TaskError>;

    /// Fetch the latest committed snapshot.
    async fn get(&self, id: TaskId) -> Result<Task, TaskError>;

    /// Atomically apply `transition` and return the resulting snapshot.
    async fn update(&self, id: TaskId, transition: Transition) -> Result<Task, TaskError>;

    /// List tasks matching `filter`, newest first.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError>;

    /// Remove a terminal task. Non-terminal tasks are rejected.
    async fn purge(&self, id: TaskId) -> Result<(), TaskError>;

    /// Short backend name reported by the health endpoint.
    fn backend(&self) -> &'static str;
}

/// Shared, dynamically dispatched registry handle.
pub type SharedRegistry = Arc<dyn TaskRegistry>;

// ---------------------------------------------------------------------------
// InMemoryTaskRegistry
// ---------------------------------------------------------------------------

/// Registry backed by a sharded concurrent map.
///
/// Each `update` holds only the shard lock of its own entry for the length
/// of one [`Task::apply`] call.
#[derive(Debug, Default)]
pub struct InMemoryTaskRegistry {
    tasks: DashMap<TaskId, Task>,
}

impl InMemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskRegistry for InMemoryTaskRegistry {
    async fn create(&self, task: Task) -> Result<(), TaskError> {
        match self.tasks.entry(task.id) {
            Entry::Occupied(_) => Err(TaskError::DuplicateId(task.id)),
            Entry::Vacant(slot) => {
                slot.insert(task);
                Ok(())
            }
        }
    }

    async fn get(&self, id: TaskId) -> Result<Task, TaskError> {
        self.tasks
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TaskError::not_found(id))
    }

    async fn update(&self, id: TaskId, transition: Transition) -> Result<Task, TaskError> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| TaskError::not_found(id))?;
        entry.apply(transition, chrono::Utc::now())?;
        Ok(entry.value().clone())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        // UUIDv7 ids sort by creation time.
        tasks.sort_by(|a, b| b.id.cmp(&a.id));

        Ok(tasks
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn purge(&self, id: TaskId) -> Result<(), TaskError> {
        match self.tasks.entry(id) {
            Entry::Vacant(_) => Err(TaskError::not_found(id)),
            Entry::Occupied(entry) if !entry.get().is_terminal() => {
                Err(TaskError::InvalidTransition {
                    id,
                    from: entry.get().state,
                    action: "purge",
                })
            }
            Entry::Occupied(entry) => {
                entry.remove();
                Ok(())
            }
        }
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
