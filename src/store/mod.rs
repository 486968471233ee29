//! Task store: keyed lookup of live task records.
//!
//! The store holds `Arc<Task>` references. Records are mutated through their
//! own lock, so [`TaskStore::update`] amounts to a presence check that keeps
//! the stored reference current, and [`TaskStore::get_all`] copies only the
//! id→record map, not the records.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::task::Task;

/// Errors returned by [`TaskStore`] writes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("task with id {id} already exists")]
    AlreadyExists { id: String },

    #[error("task with id {id} not found")]
    NotFound { id: String },
}

/// Keyed collection of task records shared by the scheduler and the workers.
///
/// Implementations must keep critical sections short; callers write to the
/// store only for brief state-transition updates.
pub trait TaskStore: Send + Sync {
    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] if the id is already tracked.
    fn create(&self, task: Arc<Task>) -> Result<(), StoreError>;

    /// Looks up a record by id.
    fn get_by_id(&self, id: &str) -> Option<Arc<Task>>;

    /// Replaces the stored reference for an existing record.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the id is not tracked. The store never
    /// inserts on update.
    fn update(&self, task: &Arc<Task>) -> Result<(), StoreError>;

    /// Returns `true` if the id is tracked.
    fn exists(&self, id: &str) -> bool;

    /// Returns a point-in-time copy of the id→record map. The records
    /// themselves stay shared and keep changing after the copy is taken.
    fn get_all(&self) -> HashMap<String, Arc<Task>>;
}

/// `RwLock<HashMap>`-backed [`TaskStore`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use taskpool::store::{InMemoryTaskStore, StoreError, TaskStore};
/// use taskpool::task::Task;
///
/// let store = InMemoryTaskStore::new();
/// store.create(Arc::new(Task::new("a", "payload", 1))).unwrap();
///
/// assert!(store.exists("a"));
/// assert!(matches!(
///     store.create(Arc::new(Task::new("a", "other", 1))),
///     Err(StoreError::AlreadyExists { .. })
/// ));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Arc<Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn create(&self, task: Arc<Task>) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(task.id()) {
            return Err(StoreError::AlreadyExists {
                id: task.id().to_owned(),
            });
        }
        tasks.insert(task.id().to_owned(), task);
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> Option<Arc<Task>> {
        self.tasks.read().get(id).cloned()
    }

    fn update(&self, task: &Arc<Task>) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(task.id()) {
            Some(slot) => {
                *slot = Arc::clone(task);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                id: task.id().to_owned(),
            }),
        }
    }

    fn exists(&self, id: &str) -> bool {
        self.tasks.read().contains_key(id)
    }

    fn get_all(&self) -> HashMap<String, Arc<Task>> {
        self.tasks.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    fn task(id: &str) -> Arc<Task> {
        Arc::new(Task::new(id, "payload", 3))
    }

    #[test]
    fn create_then_get() {
        let store = InMemoryTaskStore::new();
        store.create(task("t1")).unwrap();

        let found = store.get_by_id("t1").unwrap();
        assert_eq!(found.id(), "t1");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let store = InMemoryTaskStore::new();
        store.create(task("t1")).unwrap();
        assert_eq!(
            store.create(task("t1")),
            Err(StoreError::AlreadyExists { id: "t1".into() })
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_unknown_is_none() {
        let store = InMemoryTaskStore::new();
        assert!(store.get_by_id("missing").is_none());
        assert!(!store.exists("missing"));
    }

    #[test]
    fn update_missing_never_inserts() {
        let store = InMemoryTaskStore::new();
        assert_eq!(
            store.update(&task("ghost")),
            Err(StoreError::NotFound {
                id: "ghost".into()
            })
        );
        assert!(store.is_empty());
    }

    #[test]
    fn update_existing_succeeds() {
        let store = InMemoryTaskStore::new();
        let t = task("t1");
        store.create(Arc::clone(&t)).unwrap();
        t.set_status(TaskStatus::Running);
        store.update(&t).unwrap();
        assert_eq!(
            store.get_by_id("t1").unwrap().status(),
            TaskStatus::Running
        );
    }

    #[test]
    fn snapshot_copies_map_but_shares_records() {
        let store = InMemoryTaskStore::new();
        let t = task("t1");
        store.create(Arc::clone(&t)).unwrap();

        let snapshot = store.get_all();
        store.create(task("t2")).unwrap();
        t.set_status(TaskStatus::Done);

        // Later inserts are not visible, later record mutations are.
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["t1"].status(), TaskStatus::Done);
    }
}
