//! Core types for the list store.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::records::{Changeset, IdChanges, Tables};

/// Identity of a task list.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListId(pub u64);

impl fmt::Debug for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListId({})", self.0)
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "list#{}", self.0)
    }
}

/// Identity of a task. Drawn from the same counter as [`ListId`], so the raw
/// values never collide.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Any record addressable by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordId {
    List(ListId),
    Task(TaskId),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::List(id) => id.fmt(f),
            RecordId::Task(id) => id.fmt(f),
        }
    }
}

impl From<ListId> for RecordId {
    fn from(id: ListId) -> Self {
        RecordId::List(id)
    }
}

impl From<TaskId> for RecordId {
    fn from(id: TaskId) -> Self {
        RecordId::Task(id)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    pub fn from_secs(secs: i64) -> Self {
        Timestamp(secs * 1_000_000)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A task list with its tasks in insertion order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskList {
    pub id: ListId,
    pub name: String,
    pub created_at: Timestamp,
    pub tasks: Vec<Task>,
}

impl TaskList {
    /// Tasks not yet completed.
    pub fn pending_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_complete).count()
    }
}

/// A task, owned by exactly one list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub list_id: ListId,
    pub name: String,
    pub note: String,
    pub created_at: Timestamp,
    pub is_complete: bool,
}

/// Partial update of a list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPatch {
    pub name: Option<String>,
}

impl ListPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
    }
}

/// Partial update of a task.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub note: Option<String>,
    pub is_complete: Option<bool>,
}

impl TaskPatch {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_complete(mut self, is_complete: bool) -> Self {
        self.is_complete = Some(is_complete);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.note.is_none() && self.is_complete.is_none()
    }
}

/// Typed partial update addressed by [`RecordId`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RecordPatch {
    List(ListPatch),
    Task(TaskPatch),
}

/// Kind of a field value, used to validate queries and groupings up front.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Id,
    Text,
    Bool,
    Integer,
    Timestamp,
}

impl ValueKind {
    /// Whether values of this kind form discrete groups.
    pub fn is_groupable(self) -> bool {
        matches!(self, ValueKind::Text | ValueKind::Bool | ValueKind::Integer)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Id => "id",
            ValueKind::Text => "text",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// A single field value read off a record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    Id(u64),
    Text(String),
    Bool(bool),
    Integer(i64),
    Timestamp(Timestamp),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Id(_) => ValueKind::Id,
            FieldValue::Text(_) => ValueKind::Text,
            FieldValue::Bool(_) => ValueKind::Bool,
            FieldValue::Integer(_) => ValueKind::Integer,
            FieldValue::Timestamp(_) => ValueKind::Timestamp,
        }
    }

    /// Ordering between values of the same kind. Mixed kinds compare by kind
    /// so sorting stays total.
    pub fn compare(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Id(a), FieldValue::Id(b)) => a.cmp(b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a.cmp(b),
            (FieldValue::Timestamp(a), FieldValue::Timestamp(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            FieldValue::Id(_) => 0,
            FieldValue::Text(_) => 1,
            FieldValue::Bool(_) => 2,
            FieldValue::Integer(_) => 3,
            FieldValue::Timestamp(_) => 4,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<Timestamp> for FieldValue {
    fn from(v: Timestamp) -> Self {
        FieldValue::Timestamp(v)
    }
}

impl From<ListId> for FieldValue {
    fn from(v: ListId) -> Self {
        FieldValue::Id(v.0)
    }
}

impl From<TaskId> for FieldValue {
    fn from(v: TaskId) -> Self {
        FieldValue::Id(v.0)
    }
}

/// A queryable field of a record type.
pub trait Field: Copy + PartialEq + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    fn kind(self) -> ValueKind;
    fn name(self) -> &'static str;
}

/// Fields of a [`TaskList`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListField {
    Id,
    Name,
    CreatedAt,
    TaskCount,
    PendingCount,
}

impl Field for ListField {
    fn kind(self) -> ValueKind {
        match self {
            ListField::Id => ValueKind::Id,
            ListField::Name => ValueKind::Text,
            ListField::CreatedAt => ValueKind::Timestamp,
            ListField::TaskCount | ListField::PendingCount => ValueKind::Integer,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ListField::Id => "id",
            ListField::Name => "name",
            ListField::CreatedAt => "created_at",
            ListField::TaskCount => "task_count",
            ListField::PendingCount => "pending_count",
        }
    }
}

/// Fields of a [`Task`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskField {
    Id,
    List,
    Name,
    Note,
    CreatedAt,
    IsComplete,
}

impl Field for TaskField {
    fn kind(self) -> ValueKind {
        match self {
            TaskField::Id | TaskField::List => ValueKind::Id,
            TaskField::Name | TaskField::Note => ValueKind::Text,
            TaskField::CreatedAt => ValueKind::Timestamp,
            TaskField::IsComplete => ValueKind::Bool,
        }
    }

    fn name(self) -> &'static str {
        match self {
            TaskField::Id => "id",
            TaskField::List => "list",
            TaskField::Name => "name",
            TaskField::Note => "note",
            TaskField::CreatedAt => "created_at",
            TaskField::IsComplete => "is_complete",
        }
    }
}

/// A record type that can be queried, sectioned and observed.
pub trait Model: Clone + fmt::Debug + Send + Sync + 'static {
    type Id: Copy + Eq + Hash + Ord + fmt::Debug + Serialize + Send + Sync + 'static;
    type Field: Field;

    fn id(&self) -> Self::Id;

    fn value(&self, field: Self::Field) -> FieldValue;

    /// All rows of this type in a committed version of the store.
    fn collect(tables: &Tables) -> Vec<Self>;

    /// The part of a commit's changes that concerns this type.
    fn changes(changeset: &Changeset) -> &IdChanges<Self::Id>;
}

impl Model for TaskList {
    type Id = ListId;
    type Field = ListField;

    fn id(&self) -> ListId {
        self.id
    }

    fn value(&self, field: ListField) -> FieldValue {
        match field {
            ListField::Id => FieldValue::Id(self.id.0),
            ListField::Name => FieldValue::Text(self.name.clone()),
            ListField::CreatedAt => FieldValue::Timestamp(self.created_at),
            ListField::TaskCount => FieldValue::Integer(self.tasks.len() as i64),
            ListField::PendingCount => FieldValue::Integer(self.pending_count() as i64),
        }
    }

    fn collect(tables: &Tables) -> Vec<Self> {
        tables.lists()
    }

    fn changes(changeset: &Changeset) -> &IdChanges<ListId> {
        &changeset.lists
    }
}

impl Model for Task {
    type Id = TaskId;
    type Field = TaskField;

    fn id(&self) -> TaskId {
        self.id
    }

    fn value(&self, field: TaskField) -> FieldValue {
        match field {
            TaskField::Id => FieldValue::Id(self.id.0),
            TaskField::List => FieldValue::Id(self.list_id.0),
            TaskField::Name => FieldValue::Text(self.name.clone()),
            TaskField::Note => FieldValue::Text(self.note.clone()),
            TaskField::CreatedAt => FieldValue::Timestamp(self.created_at),
            TaskField::IsComplete => FieldValue::Bool(self.is_complete),
        }
    }

    fn collect(tables: &Tables) -> Vec<Self> {
        tables.tasks()
    }

    fn changes(changeset: &Changeset) -> &IdChanges<TaskId> {
        &changeset.tasks
    }
}
