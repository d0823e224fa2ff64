//! Per-commit change tracking.

use crate::types::{ListId, TaskId};
use std::collections::BTreeSet;

/// Identities touched by one commit, for one record type.
///
/// A record inserted and deleted within the same commit never shows up, and
/// a record inserted and then modified is only reported as inserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdChanges<I: Ord> {
    pub inserted: BTreeSet<I>,
    pub deleted: BTreeSet<I>,
    pub modified: BTreeSet<I>,
}

impl<I: Ord> Default for IdChanges<I> {
    fn default() -> Self {
        Self {
            inserted: BTreeSet::new(),
            deleted: BTreeSet::new(),
            modified: BTreeSet::new(),
        }
    }
}

impl<I: Ord + Copy> IdChanges<I> {
    pub(crate) fn insert(&mut self, id: I) {
        self.inserted.insert(id);
    }

    pub(crate) fn modify(&mut self, id: I) {
        if !self.inserted.contains(&id) && !self.deleted.contains(&id) {
            self.modified.insert(id);
        }
    }

    pub(crate) fn delete(&mut self, id: I) {
        if self.inserted.remove(&id) {
            return;
        }
        self.modified.remove(&id);
        self.deleted.insert(id);
    }

    pub fn is_modified(&self, id: &I) -> bool {
        self.modified.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }
}

/// Everything a single commit touched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Changeset {
    pub lists: IdChanges<ListId>,
    pub tasks: IdChanges<TaskId>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty() && self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_delete_cancels() {
        let mut changes = IdChanges::default();
        changes.insert(TaskId(1));
        changes.modify(TaskId(1));
        changes.delete(TaskId(1));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_insert_then_modify_stays_inserted() {
        let mut changes = IdChanges::default();
        changes.insert(ListId(1));
        changes.modify(ListId(1));
        assert!(changes.inserted.contains(&ListId(1)));
        assert!(changes.modified.is_empty());
    }

    #[test]
    fn test_modify_then_delete() {
        let mut changes = IdChanges::default();
        changes.modify(TaskId(2));
        changes.delete(TaskId(2));
        assert!(changes.modified.is_empty());
        assert!(changes.deleted.contains(&TaskId(2)));
    }
}
