//! # Listkeeper
//!
//! A journaled store of task lists and tasks with live, sectioned query
//! subscriptions.
//!
//! ## Core Concepts
//!
//! - **Records**: lists own ordered tasks; deleting a list deletes its tasks
//! - **Transactions**: every write is atomic and appended to a journal
//! - **Views**: a query plus a sectioning, observed through a subscription
//! - **Diffs**: each commit reaches subscribers as identity-based changes
//!
//! ## Example
//!
//! ```ignore
//! use listkeeper::{Store, StoreConfig, TaskQuery, TaskView, TaskField, WriteCoordinator};
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::open_or_create(StoreConfig {
//!     path: "./my-lists".into(),
//!     ..Default::default()
//! })?);
//! let lists = WriteCoordinator::new(Arc::clone(&store));
//!
//! let groceries = lists.add_list("Groceries")?;
//! let view = TaskView::new(TaskQuery::in_list(groceries))
//!     .grouped_by(TaskField::IsComplete)
//!     .with_sections([(false, "Current"), (true, "Complete")]);
//! let handle = store.subscribe_tasks(view)?;
//!
//! lists.add_task(groceries, "Milk", "")?;
//! ```

pub mod coordinator;
pub mod error;
pub mod journal;
pub mod query;
pub mod records;
pub mod snapshot;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use coordinator::WriteCoordinator;
pub use error::{ObservationError, Result, StoreError};
pub use journal::{Journal, JournalEntry};
pub use query::{ListQuery, Predicate, Query, SortDescriptor, TaskQuery};
pub use records::{Changeset, IdChanges, Mutation, Tables};
pub use snapshot::{ItemPath, ResultChanges, Section, SectionKey, Sectioning, Snapshot, SnapshotChanges};
pub use store::{CompactionSummary, LiveResults, Store, StoreConfig, StoreStats, Transaction};
pub use subscriptions::{
    ListView, SnapshotObserver, SubscriptionEvent, SubscriptionHandle, SubscriptionId,
    SubscriptionManager, TaskView, View,
};
pub use types::*;
