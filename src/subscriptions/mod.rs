//! Live query subscriptions.
//!
//! A subscription observes a [`View`]: a query plus a sectioning. It first
//! receives the full snapshot, then one update per commit that changes the
//! result, each carrying flat and sectioned diffs against the previous
//! delivery.
//!
//! # Example
//!
//! ```ignore
//! let view = TaskView::new(TaskQuery::in_list(groceries))
//!     .grouped_by(TaskField::IsComplete)
//!     .with_sections([(false, "Current"), (true, "Complete")]);
//! let handle = store.subscribe_tasks(view)?;
//!
//! loop {
//!     match handle.recv() {
//!         Ok(SubscriptionEvent::Initial { snapshot, .. }) => render(&snapshot),
//!         Ok(SubscriptionEvent::Update { snapshot, section_changes, .. }) => {
//!             animate(&section_changes);
//!             render(&snapshot);
//!         }
//!         Ok(SubscriptionEvent::Error { error }) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    ListView, SnapshotObserver, SubscriptionEvent, SubscriptionHandle, SubscriptionId, TaskView,
    View,
};
