//! Sectioned snapshots of live query results and the diffs between them.
//!
//! A [`Snapshot`] is an immutable, fully ordered view of a query result,
//! split into sections by an optional grouping field. Consecutive snapshots
//! are compared by item identity:
//!
//! - [`ResultChanges`] describes the flat ordering (what a plain list view
//!   needs), with deletions in old indices and insertions, modifications
//!   and move targets in new indices.
//! - [`SnapshotChanges`] describes the same transition in terms of sections
//!   and index paths.

mod diff;
mod section;

pub use diff::{ItemPath, ResultChanges, SnapshotChanges};
pub use section::{Section, SectionKey, Sectioning, Snapshot};
