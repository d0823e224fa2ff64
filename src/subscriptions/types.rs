//! Subscription types for live query updates.

use crate::error::{ObservationError, Result};
use crate::query::Query;
use crate::snapshot::{ResultChanges, SectionKey, Sectioning, Snapshot, SnapshotChanges};
use crate::types::{Model, Task, TaskList};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What a subscription observes: a query plus how to section its result.
#[derive(Clone, Debug, PartialEq)]
pub struct View<M: Model> {
    pub query: Query<M>,
    pub sectioning: Sectioning<M::Field>,
}

impl<M: Model> View<M> {
    /// Ungrouped view of a query.
    pub fn new(query: Query<M>) -> Self {
        Self {
            query,
            sectioning: Sectioning::default(),
        }
    }

    pub fn grouped_by(mut self, field: M::Field) -> Self {
        self.sectioning.group_by = Some(field);
        self
    }

    /// Fixed section order and labels, keyed by the grouping field's value.
    pub fn with_sections<K, L>(mut self, sections: impl IntoIterator<Item = (K, L)>) -> Self
    where
        K: Into<SectionKey>,
        L: Into<String>,
    {
        self.sectioning = self.sectioning.with_sections(sections);
        self
    }

    pub fn sections_ascending(mut self, ascending: bool) -> Self {
        self.sectioning.ascending = ascending;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.query.validate()?;
        self.sectioning.validate()
    }
}

/// View over task lists.
pub type ListView = View<TaskList>;

/// View over tasks.
pub type TaskView = View<Task>;

/// Events delivered to a subscription, in this order: one `Initial`, any
/// number of `Update`s, and at most one terminal `Error`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionEvent<I> {
    /// Full state at subscription time.
    Initial {
        snapshot: Arc<Snapshot<I>>,
        /// Query order, before sectioning.
        ordering: Vec<I>,
    },

    /// A commit changed the observed result.
    Update {
        snapshot: Arc<Snapshot<I>>,
        ordering: Vec<I>,
        /// Relative to the previously delivered `ordering`.
        changes: ResultChanges,
        /// Relative to the previously delivered `snapshot`.
        section_changes: SnapshotChanges,
        /// Commit that produced this update; 0 for view reconfiguration.
        commit: u64,
    },

    /// The store became unusable. Nothing follows.
    Error { error: ObservationError },
}

/// Callback-style consumer for [`SubscriptionHandle::drain_into`].
pub trait SnapshotObserver<I> {
    fn on_initial(&mut self, snapshot: &Snapshot<I>);

    fn on_update(
        &mut self,
        snapshot: &Snapshot<I>,
        changes: &ResultChanges,
        section_changes: &SnapshotChanges,
    );

    fn on_error(&mut self, error: &ObservationError);
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Handle to receive a subscription's events.
///
/// Once [`crate::Store::unsubscribe`] returns, nothing more is handed out
/// through this handle, including events that were already queued.
pub struct SubscriptionHandle<I> {
    pub id: SubscriptionId,
    receiver: crossbeam_channel::Receiver<SubscriptionEvent<I>>,
    cancelled: Arc<AtomicBool>,
}

impl<I> SubscriptionHandle<I> {
    pub(crate) fn new(
        id: SubscriptionId,
        receiver: crossbeam_channel::Receiver<SubscriptionEvent<I>>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            receiver,
            cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<SubscriptionEvent<I>, crossbeam_channel::RecvError> {
        if self.is_cancelled() {
            return Err(crossbeam_channel::RecvError);
        }
        let event = self.receiver.recv()?;
        if self.is_cancelled() {
            return Err(crossbeam_channel::RecvError);
        }
        Ok(event)
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(
        &self,
    ) -> std::result::Result<SubscriptionEvent<I>, crossbeam_channel::TryRecvError> {
        if self.is_cancelled() {
            return Err(crossbeam_channel::TryRecvError::Disconnected);
        }
        let event = self.receiver.try_recv()?;
        if self.is_cancelled() {
            return Err(crossbeam_channel::TryRecvError::Disconnected);
        }
        Ok(event)
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<SubscriptionEvent<I>, crossbeam_channel::RecvTimeoutError> {
        if self.is_cancelled() {
            return Err(crossbeam_channel::RecvTimeoutError::Disconnected);
        }
        let event = self.receiver.recv_timeout(timeout)?;
        if self.is_cancelled() {
            return Err(crossbeam_channel::RecvTimeoutError::Disconnected);
        }
        Ok(event)
    }

    /// Hand every queued event to `observer`, in order. Returns how many
    /// were delivered.
    pub fn drain_into(&self, observer: &mut impl SnapshotObserver<I>) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.try_recv() {
            match &event {
                SubscriptionEvent::Initial { snapshot, .. } => observer.on_initial(snapshot),
                SubscriptionEvent::Update {
                    snapshot,
                    changes,
                    section_changes,
                    ..
                } => observer.on_update(snapshot, changes, section_changes),
                SubscriptionEvent::Error { error } => observer.on_error(error),
            }
            delivered += 1;
        }
        delivered
    }
}
