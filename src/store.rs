//! Main Store struct tying the journal, tables and subscriptions together.

use crate::error::{ObservationError, Result, StoreError};
use crate::journal::{Journal, JournalEntry};
use crate::query::{ListQuery, Query, TaskQuery};
use crate::records::{Changeset, Mutation, Tables};
use crate::subscriptions::{
    ListView, SubscriptionHandle, SubscriptionId, SubscriptionManager, TaskView, View,
};
use crate::types::{
    ListId, ListPatch, Model, RecordId, RecordPatch, Task, TaskId, TaskList, TaskPatch, Timestamp,
};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Commits between journal fsyncs (1 = every commit).
    pub sync_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./listkeeper"),
            create_if_missing: true,
            sync_interval: 1,
        }
    }
}

/// Store statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreStats {
    pub list_count: u64,
    pub task_count: u64,
    /// Sequence number of the last commit. Never decreases, compaction
    /// included.
    pub commits: u64,
    /// Entries in the journal; reset by compaction.
    pub journal_entries: u64,
    pub journal_bytes: u64,
    pub subscription_count: u64,
}

/// Outcome of [`Store::compact`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactionSummary {
    /// Journal entries replaced by the rebuilt ones.
    pub entries_folded: u64,
    /// Entries holding the current state afterwards.
    pub entries_written: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"LKS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const JOURNAL_FILE: &str = "journal.bin";

/// A journaled store of task lists and their tasks.
///
/// Readers see immutable committed versions and never block writers.
/// Writers are serialized; each write is one atomic transaction whose
/// changes are pushed to every live subscription before the next write
/// starts.
pub struct Store {
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    journal: Journal,

    /// Latest committed version.
    tables: RwLock<Arc<Tables>>,

    /// Serializes writers. Holds the sequence of the last journal entry.
    writer: Mutex<u64>,

    subscriptions: SubscriptionManager,

    /// Set once the store can no longer be trusted.
    failure: RwLock<Option<ObservationError>>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let journal_path = config.path.join(JOURNAL_FILE);
        if journal_path.exists() {
            fs::remove_file(&journal_path)?;
        }
        let (journal, _) = Journal::open(journal_path, config.sync_interval)?;

        info!(path = %config.path.display(), "created store");
        Ok(Self::assemble(config, lock_file, journal, Tables::default(), 0))
    }

    /// Open an existing store, replaying its journal.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let (journal, replay) = Journal::open(config.path.join(JOURNAL_FILE), config.sync_interval)?;
        if replay.truncated_bytes > 0 {
            warn!(
                bytes = replay.truncated_bytes,
                "dropped torn journal tail left by an interrupted commit"
            );
        }

        let mut tables = Tables::default();
        let mut scratch = Changeset::default();
        for entry in &replay.entries {
            for op in &entry.ops {
                tables.apply(op, &mut scratch).map_err(|e| {
                    StoreError::Corruption(format!("journal entry {} does not replay: {}", entry.seq, e))
                })?;
            }
            tables.reserve_ids_below(entry.next_id);
        }
        let seq = replay.entries.last().map(|e| e.seq).unwrap_or(0);

        info!(
            path = %config.path.display(),
            lists = tables.list_count(),
            tasks = tables.task_count(),
            entries = replay.entries.len(),
            "opened store"
        );
        Ok(Self::assemble(config, lock_file, journal, tables, seq))
    }

    fn assemble(config: StoreConfig, lock_file: File, journal: Journal, tables: Tables, seq: u64) -> Self {
        Self {
            config,
            _lock_file: lock_file,
            journal,
            tables: RwLock::new(Arc::new(tables)),
            writer: Mutex::new(seq),
            subscriptions: SubscriptionManager::new(),
            failure: RwLock::new(None),
        }
    }

    // --- Writes ---

    /// Run `f` as one atomic transaction.
    ///
    /// If `f` returns an error nothing is written and no subscriber hears
    /// about it. Otherwise the transaction is journaled, published, and
    /// broadcast before this returns.
    pub fn write<T>(&self, f: impl FnOnce(&mut Transaction) -> Result<T>) -> Result<T> {
        let mut seq = self.writer.lock();
        self.ensure_usable()?;

        let base = Arc::clone(&*self.tables.read());
        let mut txn = Transaction {
            tables: Tables::clone(&base),
            ops: Vec::new(),
            changes: Changeset::default(),
        };
        let value = f(&mut txn)?;
        if txn.ops.is_empty() {
            return Ok(value);
        }

        let op_count = txn.ops.len();
        let entry = JournalEntry {
            seq: *seq + 1,
            timestamp: Timestamp::now(),
            next_id: txn.tables.next_id(),
            ops: txn.ops,
        };
        if let Err(e) = self.journal.append(&entry) {
            if let StoreError::Corruption(reason) = &e {
                self.poison(ObservationError::Storage(reason.clone()));
            }
            return Err(e);
        }
        *seq = entry.seq;

        let tables = Arc::new(txn.tables);
        *self.tables.write() = Arc::clone(&tables);
        debug!(seq = entry.seq, ops = op_count, "committed transaction");

        if !txn.changes.is_empty() {
            self.subscriptions.broadcast(&tables, &txn.changes, entry.seq);
        }
        Ok(value)
    }

    pub fn create_list(&self, name: &str) -> Result<ListId> {
        self.write(|txn| txn.create_list(name))
    }

    pub fn create_list_at(&self, name: &str, created_at: Timestamp) -> Result<ListId> {
        self.write(|txn| txn.create_list_at(name, created_at))
    }

    pub fn create_task(&self, list: ListId, name: &str, note: &str) -> Result<TaskId> {
        self.write(|txn| txn.create_task(list, name, note))
    }

    pub fn update_fields(&self, id: impl Into<RecordId>, patch: RecordPatch) -> Result<()> {
        let id = id.into();
        self.write(|txn| txn.update_fields(id, patch))
    }

    /// Delete a record. Deleting a list deletes its tasks.
    pub fn delete_record(&self, id: impl Into<RecordId>) -> Result<()> {
        let id = id.into();
        self.write(|txn| txn.delete_record(id))
    }

    /// Flip a task's completion. Returns the new value.
    pub fn toggle_complete(&self, id: TaskId) -> Result<bool> {
        self.write(|txn| txn.toggle_complete(id))
    }

    /// Complete every pending task of a list. Returns how many changed.
    pub fn mark_list_done(&self, id: ListId) -> Result<usize> {
        self.write(|txn| txn.mark_list_done(id))
    }

    // --- Reads ---

    /// The latest committed version.
    pub fn current(&self) -> Arc<Tables> {
        Arc::clone(&*self.tables.read())
    }

    pub fn list(&self, id: ListId) -> Option<TaskList> {
        self.tables.read().list(id)
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.tables.read().task(id)
    }

    pub fn query_lists(&self, query: ListQuery) -> LiveResults<'_, TaskList> {
        LiveResults { store: self, query }
    }

    pub fn query_tasks(&self, query: TaskQuery) -> LiveResults<'_, Task> {
        LiveResults { store: self, query }
    }

    // --- Subscriptions ---

    pub fn subscribe_lists(&self, view: ListView) -> Result<SubscriptionHandle<ListId>> {
        self.subscribe(view)
    }

    pub fn subscribe_tasks(&self, view: TaskView) -> Result<SubscriptionHandle<TaskId>> {
        self.subscribe(view)
    }

    /// Observe a view. The first event is always `Initial`.
    pub fn subscribe<M: Model>(&self, view: View<M>) -> Result<SubscriptionHandle<M::Id>> {
        let _writer = self.writer.lock();
        self.ensure_usable()?;
        let tables = self.current();
        self.subscriptions.subscribe(view, &tables)
    }

    /// Stop a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Change what a subscription observes, such as its sort order. The
    /// subscriber receives the difference as an ordinary update.
    pub fn reconfigure<M: Model>(&self, id: SubscriptionId, view: View<M>) -> Result<()> {
        let _writer = self.writer.lock();
        self.ensure_usable()?;
        let tables = self.current();
        self.subscriptions.reconfigure(id, view, &tables)
    }

    // --- Store Operations ---

    /// Rewrite the journal as the fewest entries that hold the current state.
    ///
    /// The rebuilt entries take the next sequence numbers, so commit numbers
    /// seen by subscribers keep increasing across compaction.
    pub fn compact(&self) -> Result<CompactionSummary> {
        let mut seq = self.writer.lock();
        self.ensure_usable()?;

        let tables = self.current();
        let bytes_before = self.journal.size();
        let entries_folded = self.journal.entry_count();
        let entries = Journal::pack(
            *seq + 1,
            Timestamp::now(),
            tables.next_id(),
            tables.to_mutations(),
        )?;
        if let Err(e) = self.journal.rewrite(&entries) {
            if let StoreError::Corruption(reason) = &e {
                self.poison(ObservationError::Storage(reason.clone()));
            }
            return Err(e);
        }
        if let Some(last) = entries.last() {
            *seq = last.seq;
        }

        let summary = CompactionSummary {
            entries_folded,
            entries_written: entries.len() as u64,
            bytes_before,
            bytes_after: self.journal.size(),
        };
        info!(
            entries = summary.entries_folded,
            written = summary.entries_written,
            bytes_before = summary.bytes_before,
            bytes_after = summary.bytes_after,
            "compacted journal"
        );
        Ok(summary)
    }

    /// Re-read and verify the whole journal. Returns the entry count.
    ///
    /// Damage makes the store unusable: every subscription receives a
    /// terminal error and later writes fail with `Unusable`.
    pub fn check_integrity(&self) -> Result<usize> {
        let _writer = self.writer.lock();
        self.ensure_usable()?;

        match self.journal.verify() {
            Ok(entries) => Ok(entries),
            Err(e) => {
                let failure = match &e {
                    StoreError::Io(io) => ObservationError::Storage(io.to_string()),
                    other => ObservationError::Corruption(other.to_string()),
                };
                self.poison(failure);
                Err(e)
            }
        }
    }

    pub fn is_usable(&self) -> bool {
        self.failure.read().is_none()
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        let commits = *self.writer.lock();
        let tables = self.current();
        StoreStats {
            list_count: tables.list_count() as u64,
            task_count: tables.task_count() as u64,
            commits,
            journal_entries: self.journal.entry_count(),
            journal_bytes: self.journal.size(),
            subscription_count: self.subscriptions.subscription_count() as u64,
        }
    }

    /// Sync the journal to disk.
    pub fn sync(&self) -> Result<()> {
        self.journal.sync()
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    fn ensure_usable(&self) -> Result<()> {
        match &*self.failure.read() {
            Some(failure) => Err(StoreError::Unusable(failure.clone())),
            None => Ok(()),
        }
    }

    fn poison(&self, failure: ObservationError) {
        error!(error = %failure, "store is no longer usable");
        *self.failure.write() = Some(failure.clone());
        self.subscriptions.fail_all(&failure);
    }

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        if !manifest_path.exists() {
            return Err(StoreError::NotInitialized);
        }
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

/// Staged writes against a private copy of the latest version.
///
/// Reads through a transaction see its own earlier writes.
pub struct Transaction {
    tables: Tables,
    ops: Vec<Mutation>,
    changes: Changeset,
}

impl Transaction {
    fn apply(&mut self, mutation: Mutation) -> Result<()> {
        self.tables.apply(&mutation, &mut self.changes)?;
        self.ops.push(mutation);
        Ok(())
    }

    pub fn create_list(&mut self, name: &str) -> Result<ListId> {
        self.create_list_at(name, Timestamp::now())
    }

    pub fn create_list_at(&mut self, name: &str, created_at: Timestamp) -> Result<ListId> {
        check_name(name)?;
        let id = ListId(self.tables.allocate_id());
        self.apply(Mutation::InsertList {
            id,
            name: name.to_string(),
            created_at,
        })?;
        Ok(id)
    }

    pub fn create_task(&mut self, list: ListId, name: &str, note: &str) -> Result<TaskId> {
        if !self.tables.contains_list(list) {
            return Err(StoreError::NotFound(list.into()));
        }
        check_name(name)?;
        let id = TaskId(self.tables.allocate_id());
        self.apply(Mutation::InsertTask {
            id,
            list,
            name: name.to_string(),
            note: note.to_string(),
            created_at: Timestamp::now(),
            is_complete: false,
        })?;
        Ok(id)
    }

    pub fn update_fields(&mut self, id: RecordId, patch: RecordPatch) -> Result<()> {
        match (id, patch) {
            (RecordId::List(id), RecordPatch::List(patch)) => self.update_list(id, patch),
            (RecordId::Task(id), RecordPatch::Task(patch)) => self.update_task(id, patch),
            (id, _) => {
                self.ensure_exists(id)?;
                Err(StoreError::Validation(format!(
                    "patch does not apply to {}",
                    id
                )))
            }
        }
    }

    pub fn update_list(&mut self, id: ListId, patch: ListPatch) -> Result<()> {
        self.ensure_exists(id.into())?;
        if patch.is_empty() {
            return Err(StoreError::Validation("empty patch".into()));
        }
        if let Some(name) = &patch.name {
            check_name(name)?;
        }
        self.apply(Mutation::UpdateList { id, patch })
    }

    pub fn update_task(&mut self, id: TaskId, patch: TaskPatch) -> Result<()> {
        self.ensure_exists(id.into())?;
        if patch.is_empty() {
            return Err(StoreError::Validation("empty patch".into()));
        }
        if let Some(name) = &patch.name {
            check_name(name)?;
        }
        self.apply(Mutation::UpdateTask { id, patch })
    }

    pub fn delete_record(&mut self, id: RecordId) -> Result<()> {
        match id {
            RecordId::List(id) => self.apply(Mutation::DeleteList { id }),
            RecordId::Task(id) => self.apply(Mutation::DeleteTask { id }),
        }
    }

    pub fn toggle_complete(&mut self, id: TaskId) -> Result<bool> {
        let task = self.tables.task(id).ok_or(StoreError::NotFound(id.into()))?;
        let is_complete = !task.is_complete;
        self.apply(Mutation::UpdateTask {
            id,
            patch: TaskPatch::default().with_complete(is_complete),
        })?;
        Ok(is_complete)
    }

    /// Complete every pending task of a list. Returns how many changed.
    pub fn mark_list_done(&mut self, id: ListId) -> Result<usize> {
        let pending: Vec<TaskId> = self
            .tables
            .task_ids_of(id)
            .ok_or(StoreError::NotFound(id.into()))?
            .iter()
            .copied()
            .filter(|t| matches!(self.tables.task(*t), Some(task) if !task.is_complete))
            .collect();

        for task in &pending {
            self.apply(Mutation::UpdateTask {
                id: *task,
                patch: TaskPatch::default().with_complete(true),
            })?;
        }
        Ok(pending.len())
    }

    pub fn list(&self, id: ListId) -> Option<TaskList> {
        self.tables.list(id)
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.tables.task(id)
    }

    pub fn list_count(&self) -> usize {
        self.tables.list_count()
    }

    fn ensure_exists(&self, id: RecordId) -> Result<()> {
        let exists = match id {
            RecordId::List(id) => self.tables.contains_list(id),
            RecordId::Task(id) => self.tables.contains_task(id),
        };
        if exists {
            Ok(())
        } else {
            Err(StoreError::NotFound(id))
        }
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(StoreError::Validation("name must not be blank".into()));
    }
    Ok(())
}

/// A query that always evaluates against the latest committed version.
pub struct LiveResults<'a, M: Model> {
    store: &'a Store,
    query: Query<M>,
}

impl<'a, M: Model> LiveResults<'a, M> {
    /// Matching records in query order.
    pub fn to_vec(&self) -> Vec<M> {
        self.query.evaluate(M::collect(&self.store.current()))
    }

    pub fn ids(&self) -> Vec<M::Id> {
        self.to_vec().iter().map(|r| r.id()).collect()
    }

    pub fn len(&self) -> usize {
        let tables = self.store.current();
        M::collect(&tables)
            .iter()
            .filter(|r| self.query.predicate.matches(*r))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record at `index` in query order.
    pub fn get(&self, index: usize) -> Option<M> {
        self.to_vec().into_iter().nth(index)
    }

    pub fn query(&self) -> &Query<M> {
        &self.query
    }
}
