//! Subscription manager for broadcasting committed changes.

use crate::error::{ObservationError, Result, StoreError};
use crate::records::{Changeset, IdChanges, Tables};
use crate::snapshot::{ResultChanges, Snapshot, SnapshotChanges};
use crate::types::Model;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::types::{SubscriptionEvent, SubscriptionHandle, SubscriptionId, View};

/// Type-erased subscription, so lists and tasks share one registry.
trait Observed: Send {
    /// Recompute after a commit. Returns false once the receiver is gone.
    fn refresh(&mut self, tables: &Tables, changes: &Changeset, commit: u64) -> bool;

    /// Deliver the terminal error.
    fn fail(&mut self, error: &ObservationError);

    fn cancel(&self);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Internal subscription state.
struct Subscription<M: Model> {
    view: View<M>,
    sender: Sender<SubscriptionEvent<M::Id>>,
    cancelled: Arc<AtomicBool>,
    /// Last delivered query order.
    ordering: Vec<M::Id>,
    /// Last delivered snapshot.
    snapshot: Arc<Snapshot<M::Id>>,
}

impl<M: Model> Subscription<M> {
    fn evaluate(view: &View<M>, tables: &Tables) -> (Vec<M::Id>, Snapshot<M::Id>) {
        let records = view.query.evaluate(M::collect(tables));
        let ordering = records.iter().map(|r| r.id()).collect();
        let snapshot = view.sectioning.build(&records);
        (ordering, snapshot)
    }

    fn update(&mut self, tables: &Tables, modified: &IdChanges<M::Id>, commit: u64) -> bool {
        let (ordering, snapshot) = Self::evaluate(&self.view, tables);
        let is_modified = |id: &M::Id| modified.is_modified(id);
        let changes = ResultChanges::compute(&self.ordering, &ordering, is_modified);
        let section_changes = SnapshotChanges::compute(&self.snapshot, &snapshot, is_modified);

        if changes.is_empty() && section_changes.is_empty() {
            return true;
        }

        let snapshot = Arc::new(snapshot);
        self.ordering = ordering.clone();
        self.snapshot = Arc::clone(&snapshot);

        self.sender
            .send(SubscriptionEvent::Update {
                snapshot,
                ordering,
                changes,
                section_changes,
                commit,
            })
            .is_ok()
    }
}

impl<M: Model> Observed for Subscription<M> {
    fn refresh(&mut self, tables: &Tables, changes: &Changeset, commit: u64) -> bool {
        let modified = M::changes(changes);
        // Parent lists are marked modified by task writes, so an untouched
        // record type cannot have changed.
        if modified.is_empty() {
            return true;
        }
        self.update(tables, modified, commit)
    }

    fn fail(&mut self, error: &ObservationError) {
        let _ = self.sender.send(SubscriptionEvent::Error {
            error: error.clone(),
        });
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Registry of live views. Every commit is diffed against each view's last
/// delivered state, in commit order.
pub struct SubscriptionManager {
    /// Held while delivering, so cancellation never races a send.
    subscriptions: Mutex<HashMap<SubscriptionId, Box<dyn Observed>>>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a view and queue its `Initial` event.
    ///
    /// The caller must hold the store's write lock so no commit lands
    /// between evaluating `tables` and registering.
    pub(crate) fn subscribe<M: Model>(
        &self,
        view: View<M>,
        tables: &Tables,
    ) -> Result<SubscriptionHandle<M::Id>> {
        view.validate()?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = unbounded();
        let cancelled = Arc::new(AtomicBool::new(false));

        let (ordering, snapshot) = Subscription::<M>::evaluate(&view, tables);
        let snapshot = Arc::new(snapshot);
        let _ = sender.send(SubscriptionEvent::Initial {
            snapshot: Arc::clone(&snapshot),
            ordering: ordering.clone(),
        });

        let subscription = Subscription {
            view,
            sender,
            cancelled: Arc::clone(&cancelled),
            ordering,
            snapshot,
        };
        self.subscriptions.lock().insert(id, Box::new(subscription));
        debug!(subscription = id.0, "subscribed");

        Ok(SubscriptionHandle::new(id, receiver, cancelled))
    }

    /// Stop delivery. No event reaches the handle after this returns.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.lock();
        match subs.remove(&id) {
            Some(sub) => {
                sub.cancel();
                debug!(subscription = id.0, "unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Swap a subscription's view, delivering the difference as an update
    /// with commit 0. Nothing is modified by a reconfiguration.
    pub(crate) fn reconfigure<M: Model>(
        &self,
        id: SubscriptionId,
        view: View<M>,
        tables: &Tables,
    ) -> Result<()> {
        view.validate()?;

        let mut subs = self.subscriptions.lock();
        let sub = subs
            .get_mut(&id)
            .ok_or(StoreError::UnknownSubscription(id.0))?;
        let sub = sub
            .as_any_mut()
            .downcast_mut::<Subscription<M>>()
            .ok_or_else(|| {
                StoreError::Configuration(format!(
                    "subscription {} observes a different record type",
                    id.0
                ))
            })?;

        sub.view = view;
        if !sub.update(tables, &IdChanges::default(), 0) {
            subs.remove(&id);
        }
        Ok(())
    }

    /// Diff every view against a newly published version.
    pub(crate) fn broadcast(&self, tables: &Tables, changes: &Changeset, commit: u64) {
        let mut subs = self.subscriptions.lock();
        subs.retain(|id, sub| {
            let alive = sub.refresh(tables, changes, commit);
            if !alive {
                trace!(subscription = id.0, "dropping disconnected subscriber");
            }
            alive
        });
    }

    /// Deliver a terminal error to every subscription and forget them all.
    pub(crate) fn fail_all(&self, error: &ObservationError) {
        let mut subs = self.subscriptions.lock();
        for (_, mut sub) in subs.drain() {
            sub.fail(error);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
