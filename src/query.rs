//! Predicates, sort descriptors and live queries.
//!
//! Predicates compose with the `&`, `|` and `!` operators:
//!
//! ```ignore
//! let open_errands = Predicate::eq(TaskField::IsComplete, false)
//!     & Predicate::contains(TaskField::Name, "buy");
//! ```

use crate::error::{Result, StoreError};
use crate::types::{Field, FieldValue, ListField, ListId, Model, TaskField, ValueKind};
use std::cmp::Ordering;
use std::ops::{BitAnd, BitOr, Not};

/// A filter over records with fields of type `F`.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate<F> {
    All,
    Eq(F, FieldValue),
    Lt(F, FieldValue),
    Gt(F, FieldValue),
    /// Case-insensitive substring match on a text field.
    Contains(F, String),
    And(Box<Predicate<F>>, Box<Predicate<F>>),
    Or(Box<Predicate<F>>, Box<Predicate<F>>),
    Not(Box<Predicate<F>>),
}

impl<F> Default for Predicate<F> {
    fn default() -> Self {
        Predicate::All
    }
}

impl<F: Field> Predicate<F> {
    pub fn eq(field: F, value: impl Into<FieldValue>) -> Self {
        Predicate::Eq(field, value.into())
    }

    pub fn lt(field: F, value: impl Into<FieldValue>) -> Self {
        Predicate::Lt(field, value.into())
    }

    pub fn gt(field: F, value: impl Into<FieldValue>) -> Self {
        Predicate::Gt(field, value.into())
    }

    pub fn contains(field: F, needle: impl Into<String>) -> Self {
        Predicate::Contains(field, needle.into())
    }

    /// Evaluate against a record.
    pub fn matches<M: Model<Field = F>>(&self, record: &M) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Eq(field, value) => record.value(*field) == *value,
            Predicate::Lt(field, value) => record.value(*field).compare(value) == Ordering::Less,
            Predicate::Gt(field, value) => {
                record.value(*field).compare(value) == Ordering::Greater
            }
            Predicate::Contains(field, needle) => match record.value(*field) {
                FieldValue::Text(text) => text.to_lowercase().contains(&needle.to_lowercase()),
                _ => false,
            },
            Predicate::And(a, b) => a.matches(record) && b.matches(record),
            Predicate::Or(a, b) => a.matches(record) || b.matches(record),
            Predicate::Not(inner) => !inner.matches(record),
        }
    }

    /// Reject comparisons whose value kind does not match the field.
    pub fn validate(&self) -> Result<()> {
        match self {
            Predicate::All => Ok(()),
            Predicate::Eq(field, value) | Predicate::Lt(field, value) | Predicate::Gt(field, value) => {
                check_kind(*field, value.kind())
            }
            Predicate::Contains(field, _) => check_kind(*field, ValueKind::Text),
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.validate()?;
                b.validate()
            }
            Predicate::Not(inner) => inner.validate(),
        }
    }
}

fn check_kind<F: Field>(field: F, kind: ValueKind) -> Result<()> {
    if field.kind() == kind {
        Ok(())
    } else {
        Err(StoreError::Configuration(format!(
            "field `{}` holds {} values, predicate uses {}",
            field.name(),
            field.kind(),
            kind
        )))
    }
}

impl<F> BitAnd for Predicate<F> {
    type Output = Predicate<F>;

    fn bitand(self, rhs: Self) -> Self::Output {
        Predicate::And(Box::new(self), Box::new(rhs))
    }
}

impl<F> BitOr for Predicate<F> {
    type Output = Predicate<F>;

    fn bitor(self, rhs: Self) -> Self::Output {
        Predicate::Or(Box::new(self), Box::new(rhs))
    }
}

impl<F> Not for Predicate<F> {
    type Output = Predicate<F>;

    fn not(self) -> Self::Output {
        Predicate::Not(Box::new(self))
    }
}

/// One sort key.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SortDescriptor<F> {
    pub field: F,
    pub ascending: bool,
}

impl<F> SortDescriptor<F> {
    pub fn ascending(field: F) -> Self {
        Self {
            field,
            ascending: true,
        }
    }

    pub fn descending(field: F) -> Self {
        Self {
            field,
            ascending: false,
        }
    }
}

/// Filter plus ordering over one record type.
#[derive(Clone, Debug, PartialEq)]
pub struct Query<M: Model> {
    pub predicate: Predicate<M::Field>,
    pub sort: Vec<SortDescriptor<M::Field>>,
}

impl<M: Model> Default for Query<M> {
    fn default() -> Self {
        Self {
            predicate: Predicate::All,
            sort: Vec::new(),
        }
    }
}

impl<M: Model> Query<M> {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate<M::Field>) -> Self {
        self.predicate = match std::mem::take(&mut self.predicate) {
            Predicate::All => predicate,
            existing => existing & predicate,
        };
        self
    }

    pub fn sorted_by(mut self, field: M::Field, ascending: bool) -> Self {
        self.sort.push(if ascending {
            SortDescriptor::ascending(field)
        } else {
            SortDescriptor::descending(field)
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.predicate.validate()
    }

    /// Filter and sort `records`. Records equal under every sort key keep
    /// identity order.
    pub fn evaluate(&self, records: Vec<M>) -> Vec<M> {
        let mut matched: Vec<M> = records
            .into_iter()
            .filter(|r| self.predicate.matches(r))
            .collect();
        matched.sort_by(|a, b| self.compare(a, b));
        matched
    }

    fn compare(&self, a: &M, b: &M) -> Ordering {
        for descriptor in &self.sort {
            let ord = a.value(descriptor.field).compare(&b.value(descriptor.field));
            let ord = if descriptor.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id().cmp(&b.id())
    }
}

/// Query over task lists.
pub type ListQuery = Query<crate::types::TaskList>;

/// Query over tasks.
pub type TaskQuery = Query<crate::types::Task>;

impl TaskQuery {
    /// Tasks owned by one list.
    pub fn in_list(list: ListId) -> Self {
        Query::all().filter(Predicate::eq(TaskField::List, list))
    }
}

impl ListQuery {
    /// Case-insensitive search on list names.
    pub fn search(text: impl Into<String>) -> Self {
        Query::all().filter(Predicate::contains(ListField::Name, text))
    }
}
