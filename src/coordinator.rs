//! User-facing write verbs over a shared store.

use crate::error::Result;
use crate::store::Store;
use crate::types::{ListId, ListPatch, RecordId, RecordPatch, TaskId, TaskPatch};
use std::sync::Arc;
use tracing::{debug, info};

/// Demo content for an empty store: `(list, [(task, note, complete)])`.
const SAMPLE_DATA: &[(&str, &[(&str, &str, bool)])] = &[
    (
        "Groceries",
        &[
            ("Milk", "2%", false),
            ("Bread", "", false),
            ("Eggs", "a dozen", true),
        ],
    ),
    (
        "Home",
        &[
            ("Fix the kitchen tap", "washer is worn", false),
            ("Water the plants", "", true),
        ],
    ),
    ("Work", &[("Send weekly report", "", false)]),
];

/// Turns one user intent into exactly one store transaction.
#[derive(Clone)]
pub struct WriteCoordinator {
    store: Arc<Store>,
}

impl WriteCoordinator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn add_list(&self, name: &str) -> Result<ListId> {
        let id = self.store.create_list(name)?;
        debug!(list = %id, "added list");
        Ok(id)
    }

    pub fn rename_list(&self, id: ListId, name: &str) -> Result<()> {
        self.store
            .update_fields(id, RecordPatch::List(ListPatch::name(name)))?;
        debug!(list = %id, "renamed list");
        Ok(())
    }

    /// Deletes the list and all of its tasks.
    pub fn delete_list(&self, id: ListId) -> Result<()> {
        self.store.delete_record(id)?;
        debug!(list = %id, "deleted list");
        Ok(())
    }

    /// Complete every pending task in one commit. Returns how many changed.
    pub fn mark_list_done(&self, id: ListId) -> Result<usize> {
        let changed = self.store.mark_list_done(id)?;
        debug!(list = %id, changed, "marked list done");
        Ok(changed)
    }

    pub fn add_task(&self, list: ListId, name: &str, note: &str) -> Result<TaskId> {
        let id = self.store.create_task(list, name, note)?;
        debug!(list = %list, task = %id, "added task");
        Ok(id)
    }

    /// Change a task's name and note together.
    pub fn edit_task(&self, id: TaskId, name: &str, note: &str) -> Result<()> {
        let patch = TaskPatch::default().with_name(name).with_note(note);
        self.store
            .update_fields(RecordId::Task(id), RecordPatch::Task(patch))?;
        debug!(task = %id, "edited task");
        Ok(())
    }

    pub fn delete_task(&self, id: TaskId) -> Result<()> {
        self.store.delete_record(id)?;
        debug!(task = %id, "deleted task");
        Ok(())
    }

    /// Returns the task's new completion state.
    pub fn toggle_task(&self, id: TaskId) -> Result<bool> {
        let is_complete = self.store.toggle_complete(id)?;
        debug!(task = %id, is_complete, "toggled task");
        Ok(is_complete)
    }

    /// Populate an empty store with demo lists. Does nothing if any list
    /// exists. Returns whether data was added.
    pub fn seed_sample_data(&self) -> Result<bool> {
        let seeded = self.store.write(|txn| {
            if txn.list_count() > 0 {
                return Ok(false);
            }
            for (list_name, tasks) in SAMPLE_DATA {
                let list = txn.create_list(list_name)?;
                for (name, note, complete) in tasks.iter() {
                    let task = txn.create_task(list, name, note)?;
                    if *complete {
                        txn.toggle_complete(task)?;
                    }
                }
            }
            Ok(true)
        })?;

        if seeded {
            info!(lists = SAMPLE_DATA.len(), "seeded sample data");
        }
        Ok(seeded)
    }
}
