//! In-memory record tables and the mutations that change them.
//!
//! A committed version of the store is an immutable [`Tables`] value. Writes
//! are expressed as [`Mutation`]s, which are both applied to the tables and
//! appended to the journal, and every applied mutation records what it
//! touched in a [`Changeset`].

mod changes;
mod tables;

pub use changes::{Changeset, IdChanges};
pub use tables::{Mutation, Tables};
