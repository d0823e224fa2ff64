//! Record tables for lists and their owned tasks.

use crate::error::{Result, StoreError};
use crate::types::{ListId, ListPatch, Task, TaskId, TaskList, TaskPatch, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::changes::Changeset;

/// A primitive write, as applied to the tables and stored in the journal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    InsertList {
        id: ListId,
        name: String,
        created_at: Timestamp,
    },
    InsertTask {
        id: TaskId,
        list: ListId,
        name: String,
        note: String,
        created_at: Timestamp,
        is_complete: bool,
    },
    UpdateList {
        id: ListId,
        patch: ListPatch,
    },
    UpdateTask {
        id: TaskId,
        patch: TaskPatch,
    },
    /// Removes the list and every task it owns.
    DeleteList {
        id: ListId,
    },
    DeleteTask {
        id: TaskId,
    },
}

#[derive(Clone, Debug)]
struct ListRow {
    name: String,
    created_at: Timestamp,
    tasks: Vec<TaskId>,
}

#[derive(Clone, Debug)]
struct TaskRow {
    list: ListId,
    name: String,
    note: String,
    created_at: Timestamp,
    is_complete: bool,
}

/// One committed version of all records.
#[derive(Clone, Debug)]
pub struct Tables {
    lists: BTreeMap<ListId, ListRow>,
    tasks: BTreeMap<TaskId, TaskRow>,
    /// Next identity to hand out; shared by lists and tasks.
    next_id: u64,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            lists: BTreeMap::new(),
            tasks: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl Tables {
    /// All lists in identity (creation) order.
    pub fn lists(&self) -> Vec<TaskList> {
        self.lists
            .iter()
            .map(|(id, row)| self.materialize_list(*id, row))
            .collect()
    }

    /// All tasks in identity (creation) order.
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .map(|(id, row)| materialize_task(*id, row))
            .collect()
    }

    pub fn list(&self, id: ListId) -> Option<TaskList> {
        self.lists.get(&id).map(|row| self.materialize_list(id, row))
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).map(|row| materialize_task(id, row))
    }

    pub fn contains_list(&self, id: ListId) -> bool {
        self.lists.contains_key(&id)
    }

    pub fn contains_task(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Task ids owned by a list, in insertion order.
    pub fn task_ids_of(&self, id: ListId) -> Option<&[TaskId]> {
        self.lists.get(&id).map(|row| row.tasks.as_slice())
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub(crate) fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Ids are never handed out twice, even across compaction.
    pub(crate) fn reserve_ids_below(&mut self, next_id: u64) {
        self.next_id = self.next_id.max(next_id);
    }

    /// Mutations that rebuild this version from empty tables.
    pub(crate) fn to_mutations(&self) -> Vec<Mutation> {
        let mut ops = Vec::with_capacity(self.lists.len() + self.tasks.len());
        for (id, row) in &self.lists {
            ops.push(Mutation::InsertList {
                id: *id,
                name: row.name.clone(),
                created_at: row.created_at,
            });
            for task_id in &row.tasks {
                if let Some(task) = self.tasks.get(task_id) {
                    ops.push(Mutation::InsertTask {
                        id: *task_id,
                        list: *id,
                        name: task.name.clone(),
                        note: task.note.clone(),
                        created_at: task.created_at,
                        is_complete: task.is_complete,
                    });
                }
            }
        }
        ops
    }

    /// Apply one mutation, recording what it touched.
    ///
    /// A failed mutation leaves the tables unchanged.
    pub(crate) fn apply(&mut self, mutation: &Mutation, changes: &mut Changeset) -> Result<()> {
        match mutation {
            Mutation::InsertList {
                id,
                name,
                created_at,
            } => {
                if self.lists.contains_key(id) || self.tasks.contains_key(&TaskId(id.0)) {
                    return Err(StoreError::Corruption(format!("duplicate identity {}", id)));
                }
                self.lists.insert(
                    *id,
                    ListRow {
                        name: name.clone(),
                        created_at: *created_at,
                        tasks: Vec::new(),
                    },
                );
                self.next_id = self.next_id.max(id.0 + 1);
                changes.lists.insert(*id);
            }

            Mutation::InsertTask {
                id,
                list,
                name,
                note,
                created_at,
                is_complete,
            } => {
                if self.tasks.contains_key(id) || self.lists.contains_key(&ListId(id.0)) {
                    return Err(StoreError::Corruption(format!("duplicate identity {}", id)));
                }
                let row = self
                    .lists
                    .get_mut(list)
                    .ok_or(StoreError::NotFound((*list).into()))?;
                row.tasks.push(*id);
                self.tasks.insert(
                    *id,
                    TaskRow {
                        list: *list,
                        name: name.clone(),
                        note: note.clone(),
                        created_at: *created_at,
                        is_complete: *is_complete,
                    },
                );
                self.next_id = self.next_id.max(id.0 + 1);
                changes.tasks.insert(*id);
                changes.lists.modify(*list);
            }

            Mutation::UpdateList { id, patch } => {
                let row = self
                    .lists
                    .get_mut(id)
                    .ok_or(StoreError::NotFound((*id).into()))?;
                let mut changed = false;
                if let Some(name) = &patch.name {
                    changed |= replace(&mut row.name, name.clone());
                }
                if changed {
                    changes.lists.modify(*id);
                }
            }

            Mutation::UpdateTask { id, patch } => {
                let row = self
                    .tasks
                    .get_mut(id)
                    .ok_or(StoreError::NotFound((*id).into()))?;
                let mut changed = false;
                if let Some(name) = &patch.name {
                    changed |= replace(&mut row.name, name.clone());
                }
                if let Some(note) = &patch.note {
                    changed |= replace(&mut row.note, note.clone());
                }
                if let Some(is_complete) = patch.is_complete {
                    changed |= replace(&mut row.is_complete, is_complete);
                }
                if changed {
                    let list = row.list;
                    changes.tasks.modify(*id);
                    changes.lists.modify(list);
                }
            }

            Mutation::DeleteList { id } => {
                let row = self
                    .lists
                    .remove(id)
                    .ok_or(StoreError::NotFound((*id).into()))?;
                for task_id in row.tasks {
                    self.tasks.remove(&task_id);
                    changes.tasks.delete(task_id);
                }
                changes.lists.delete(*id);
            }

            Mutation::DeleteTask { id } => {
                let row = self
                    .tasks
                    .remove(id)
                    .ok_or(StoreError::NotFound((*id).into()))?;
                if let Some(list) = self.lists.get_mut(&row.list) {
                    list.tasks.retain(|t| t != id);
                }
                changes.tasks.delete(*id);
                changes.lists.modify(row.list);
            }
        }
        Ok(())
    }

    fn materialize_list(&self, id: ListId, row: &ListRow) -> TaskList {
        TaskList {
            id,
            name: row.name.clone(),
            created_at: row.created_at,
            tasks: row
                .tasks
                .iter()
                .filter_map(|task_id| {
                    self.tasks
                        .get(task_id)
                        .map(|task| materialize_task(*task_id, task))
                })
                .collect(),
        }
    }
}

fn materialize_task(id: TaskId, row: &TaskRow) -> Task {
    Task {
        id,
        list_id: row.list,
        name: row.name.clone(),
        note: row.note.clone(),
        created_at: row.created_at,
        is_complete: row.is_complete,
    }
}

/// Store `value` into `slot`, reporting whether it differed.
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
