//! Integration tests for the list store and its live subscriptions.

use listkeeper::{
    ItemPath, ListField, ListId, ListQuery, ListView, ObservationError, Predicate, ResultChanges,
    SectionKey, Snapshot, SnapshotChanges, SnapshotObserver, Store, StoreConfig,
    SubscriptionEvent, SubscriptionHandle, TaskField, TaskId, TaskQuery, TaskView, Timestamp,
    WriteCoordinator,
};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn test_store(dir: &TempDir) -> Arc<Store> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Arc::new(
        Store::create(StoreConfig {
            path: dir.path().join("store"),
            create_if_missing: true,
            sync_interval: 1,
        })
        .unwrap(),
    )
}

fn expect_initial<I: std::fmt::Debug>(handle: &SubscriptionHandle<I>) -> (Arc<Snapshot<I>>, Vec<I>) {
    match handle.recv_timeout(Duration::from_millis(200)).unwrap() {
        SubscriptionEvent::Initial { snapshot, ordering } => (snapshot, ordering),
        other => panic!("Expected Initial event, got {:?}", other),
    }
}

fn expect_update<I: std::fmt::Debug>(
    handle: &SubscriptionHandle<I>,
) -> (Arc<Snapshot<I>>, ResultChanges, SnapshotChanges) {
    match handle.recv_timeout(Duration::from_millis(200)).unwrap() {
        SubscriptionEvent::Update {
            snapshot,
            changes,
            section_changes,
            ..
        } => (snapshot, changes, section_changes),
        other => panic!("Expected Update event, got {:?}", other),
    }
}

fn assert_quiet<I>(handle: &SubscriptionHandle<I>) {
    assert!(handle.recv_timeout(Duration::from_millis(50)).is_err());
}

fn day(n: i64) -> Timestamp {
    // 2024-01-01T00:00:00Z plus n days
    Timestamp::from_secs(1_704_067_200 + n * 86_400)
}

// --- Result Diffs ---

#[test]
fn test_append_by_date_reports_single_insertion() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    store.create_list_at("A", day(0)).unwrap();
    store.create_list_at("B", day(1)).unwrap();

    let view = ListView::new(ListQuery::all().sorted_by(ListField::CreatedAt, true));
    let handle = store.subscribe_lists(view).unwrap();
    let (snapshot, ordering) = expect_initial(&handle);
    assert_eq!(ordering.len(), 2);
    assert_eq!(snapshot.sections.len(), 1);

    let c = store.create_list_at("C", day(2)).unwrap();

    let (snapshot, changes, _) = expect_update(&handle);
    assert_eq!(changes.insertions, vec![2]);
    assert!(changes.deletions.is_empty());
    assert!(changes.modifications.is_empty());
    assert!(changes.moves.is_empty());
    assert_eq!(snapshot.ids().last(), Some(c));
}

#[test]
fn test_rename_sort_key_reports_one_move() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let coordinator = WriteCoordinator::new(Arc::clone(&store));

    let a = coordinator.add_list("Alpha").unwrap();
    coordinator.add_list("Bravo").unwrap();
    coordinator.add_list("Charlie").unwrap();

    let view = ListView::new(ListQuery::all().sorted_by(ListField::Name, true));
    let handle = store.subscribe_lists(view).unwrap();
    expect_initial(&handle);

    coordinator.rename_list(a, "Delta").unwrap();

    let (snapshot, changes, _) = expect_update(&handle);
    assert_eq!(changes.moves, vec![(0, 2)]);
    assert_eq!(changes.modifications, vec![2]);
    assert!(changes.insertions.is_empty());
    assert!(changes.deletions.is_empty());
    assert_eq!(snapshot.ids().last(), Some(a));
}

#[test]
fn test_delete_list_cascades_to_task_views() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let coordinator = WriteCoordinator::new(Arc::clone(&store));

    let home = coordinator.add_list("Home").unwrap();
    let work = coordinator.add_list("Work").unwrap();
    coordinator.add_task(home, "sweep", "").unwrap();
    coordinator.add_task(home, "dust", "").unwrap();
    let report = coordinator.add_task(work, "report", "").unwrap();

    let handle = store.subscribe_tasks(TaskView::new(TaskQuery::all())).unwrap();
    let (_, ordering) = expect_initial(&handle);
    assert_eq!(ordering.len(), 3);

    coordinator.delete_list(home).unwrap();

    let (snapshot, changes, _) = expect_update(&handle);
    assert_eq!(changes.deletions, vec![0, 1]);
    assert!(changes.insertions.is_empty());
    assert_eq!(snapshot.ids().collect::<Vec<_>>(), vec![report]);
    assert_eq!(store.query_tasks(TaskQuery::all()).len(), 1);
    assert!(store.list(home).is_none());
    assert!(store.list(work).is_some());
}

#[test]
fn test_mark_done_reports_one_modification_per_task() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let coordinator = WriteCoordinator::new(Arc::clone(&store));

    let list = coordinator.add_list("Errands").unwrap();
    let done = coordinator.add_task(list, "bank", "").unwrap();
    coordinator.add_task(list, "post", "").unwrap();
    coordinator.add_task(list, "shop", "").unwrap();
    coordinator.toggle_task(done).unwrap();

    let handle = store
        .subscribe_tasks(TaskView::new(TaskQuery::in_list(list)))
        .unwrap();
    expect_initial(&handle);

    assert_eq!(coordinator.mark_list_done(list).unwrap(), 2);

    let (_, changes, _) = expect_update(&handle);
    assert_eq!(changes.modifications, vec![1, 2]);
    assert!(changes.moves.is_empty());
    assert_quiet(&handle);
}

#[test]
fn test_unchanged_result_delivers_nothing() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let coordinator = WriteCoordinator::new(Arc::clone(&store));

    let home = coordinator.add_list("Home").unwrap();
    let work = coordinator.add_list("Work").unwrap();

    let handle = store
        .subscribe_tasks(TaskView::new(TaskQuery::in_list(home)))
        .unwrap();
    expect_initial(&handle);

    coordinator.add_task(work, "report", "").unwrap();
    coordinator.rename_list(work, "Office").unwrap();
    assert_quiet(&handle);
}

// --- Sectioned Views ---

#[test]
fn test_toggle_under_completion_sections() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let coordinator = WriteCoordinator::new(Arc::clone(&store));

    let list = coordinator.add_list("Groceries").unwrap();
    let milk = coordinator.add_task(list, "Milk", "").unwrap();
    coordinator.add_task(list, "Bread", "").unwrap();
    let eggs = coordinator.add_task(list, "Eggs", "").unwrap();
    coordinator.toggle_task(eggs).unwrap();

    let view = TaskView::new(TaskQuery::in_list(list))
        .grouped_by(TaskField::IsComplete)
        .with_sections([(false, "Current"), (true, "Complete")]);
    let handle = store.subscribe_tasks(view).unwrap();
    let (snapshot, _) = expect_initial(&handle);
    let labels: Vec<&str> = snapshot.sections.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["Current", "Complete"]);

    coordinator.toggle_task(milk).unwrap();

    let (snapshot, _, sections) = expect_update(&handle);
    assert_eq!(sections.deletions, vec![ItemPath::new(0, 0)]);
    assert_eq!(sections.insertions, vec![ItemPath::new(1, 0)]);
    assert!(sections.moves.is_empty());
    assert!(sections.inserted_sections.is_empty());
    assert_eq!(
        snapshot.section(&SectionKey::Bool(true)).unwrap().items,
        vec![milk, eggs]
    );
    assert_quiet(&handle);
}

#[test]
fn test_last_item_leaving_section_deletes_it() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let coordinator = WriteCoordinator::new(Arc::clone(&store));

    let list = coordinator.add_list("Groceries").unwrap();
    let milk = coordinator.add_task(list, "Milk", "").unwrap();
    coordinator.add_task(list, "Bread", "").unwrap();
    coordinator.toggle_task(milk).unwrap();

    let view = TaskView::new(TaskQuery::in_list(list))
        .grouped_by(TaskField::IsComplete)
        .with_sections([(false, "Current"), (true, "Complete")]);
    let handle = store.subscribe_tasks(view).unwrap();
    expect_initial(&handle);

    coordinator.toggle_task(milk).unwrap();

    let (snapshot, _, sections) = expect_update(&handle);
    assert_eq!(sections.deleted_sections, vec![1]);
    assert!(sections.deletions.is_empty());
    assert_eq!(sections.insertions, vec![ItemPath::new(0, 0)]);
    assert_eq!(snapshot.sections.len(), 1);
}

#[test]
fn test_empty_result_has_zero_sections() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let view = TaskView::new(TaskQuery::all()).grouped_by(TaskField::IsComplete);
    let handle = store.subscribe_tasks(view).unwrap();
    let (snapshot, ordering) = expect_initial(&handle);
    assert!(snapshot.is_empty());
    assert!(ordering.is_empty());
}

// --- Subscription Lifecycle ---

#[test]
fn test_equivalent_subscriptions_are_independent() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let first = store.subscribe_lists(ListView::new(ListQuery::all())).unwrap();
    expect_initial(&first);
    store.create_list("Early").unwrap();

    let second = store.subscribe_lists(ListView::new(ListQuery::all())).unwrap();
    let (_, ordering) = expect_initial(&second);
    assert_eq!(ordering.len(), 1);

    store.create_list("Late").unwrap();

    let (_, early, _) = expect_update(&first);
    assert_eq!(early.insertions, vec![0]);
    let (_, late, _) = expect_update(&first);
    assert_eq!(late.insertions, vec![1]);

    let (snapshot, changes, _) = expect_update(&second);
    assert_eq!(changes.insertions, vec![1]);
    assert_eq!(snapshot.len(), 2);
    assert_quiet(&second);
}

#[test]
fn test_unsubscribe_during_concurrent_writes() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let handle = store.subscribe_lists(ListView::new(ListQuery::all())).unwrap();
    expect_initial(&handle);

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let store = Arc::clone(&store);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut written = 0;
            while !stop.load(Ordering::Relaxed) {
                store.create_list(&format!("list {}", written)).unwrap();
                written += 1;
            }
            written
        })
    };

    // Let some updates queue up.
    handle.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(store.unsubscribe(handle.id));

    for _ in 0..20 {
        assert!(handle.try_recv().is_err());
        thread::sleep(Duration::from_millis(1));
    }

    stop.store(true, Ordering::Relaxed);
    let written = writer.join().unwrap();
    assert!(written > 0);
    assert!(handle.recv_timeout(Duration::from_millis(20)).is_err());
    assert_eq!(store.stats().subscription_count, 0);
}

#[test]
fn test_reconfigure_resorts_view() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let a = store.create_list("a").unwrap();
    let b = store.create_list("b").unwrap();
    let c = store.create_list("c").unwrap();

    let ascending = ListView::new(ListQuery::all().sorted_by(ListField::Name, true));
    let handle = store.subscribe_lists(ascending).unwrap();
    expect_initial(&handle);

    let descending = ListView::new(ListQuery::all().sorted_by(ListField::Name, false));
    store.reconfigure(handle.id, descending).unwrap();

    match handle.recv_timeout(Duration::from_millis(200)).unwrap() {
        SubscriptionEvent::Update {
            ordering,
            changes,
            commit,
            ..
        } => {
            assert_eq!(ordering, vec![c, b, a]);
            assert_eq!(commit, 0);
            assert!(changes.modifications.is_empty());
            assert_eq!(changes.moves.len(), 2);
        }
        other => panic!("Expected Update event, got {:?}", other),
    }
}

#[derive(Default)]
struct Recorder {
    initial: usize,
    updates: Vec<ResultChanges>,
    errors: Vec<ObservationError>,
    last_len: usize,
}

impl SnapshotObserver<ListId> for Recorder {
    fn on_initial(&mut self, snapshot: &Snapshot<ListId>) {
        self.initial += 1;
        self.last_len = snapshot.len();
    }

    fn on_update(
        &mut self,
        snapshot: &Snapshot<ListId>,
        changes: &ResultChanges,
        _section_changes: &SnapshotChanges,
    ) {
        self.updates.push(changes.clone());
        self.last_len = snapshot.len();
    }

    fn on_error(&mut self, error: &ObservationError) {
        self.errors.push(error.clone());
    }
}

#[test]
fn test_drain_into_observer() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let coordinator = WriteCoordinator::new(Arc::clone(&store));

    let handle = store.subscribe_lists(ListView::new(ListQuery::all())).unwrap();
    coordinator.seed_sample_data().unwrap();
    let list = coordinator.add_list("Extra").unwrap();
    coordinator.add_task(list, "first", "").unwrap();

    let mut recorder = Recorder::default();
    assert_eq!(handle.drain_into(&mut recorder), 4);
    assert_eq!(recorder.initial, 1);
    assert_eq!(recorder.updates.len(), 3);
    assert_eq!(recorder.updates[0].insertions, vec![0, 1, 2]);
    assert_eq!(recorder.updates[2].modifications, vec![3]);
    assert_eq!(recorder.last_len, 4);
    assert!(recorder.errors.is_empty());
}

#[test]
fn test_event_serializes_with_type_tag() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    store.create_list("Inbox").unwrap();

    let handle = store.subscribe_lists(ListView::new(ListQuery::all())).unwrap();
    let event = handle.recv().unwrap();
    let json = serde_json::to_value(&event).unwrap();

    assert_eq!(json["type"], "initial");
    assert_eq!(json["ordering"], serde_json::json!([1]));
    assert_eq!(json["snapshot"]["sections"][0]["items"], serde_json::json!([1]));
}

// --- Consistency ---

#[derive(Clone, Debug)]
enum Op {
    AddList(String),
    AddTask(usize, String),
    Rename(usize, String),
    Toggle(usize),
    DeleteTask(usize),
    DeleteList(usize),
    MarkDone(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let name = "[a-e]{1,3}";
    prop_oneof![
        name.prop_map(Op::AddList),
        (any::<usize>(), name).prop_map(|(i, n)| Op::AddTask(i, n)),
        (any::<usize>(), name).prop_map(|(i, n)| Op::Rename(i, n)),
        any::<usize>().prop_map(Op::Toggle),
        any::<usize>().prop_map(Op::DeleteTask),
        any::<usize>().prop_map(Op::DeleteList),
        any::<usize>().prop_map(Op::MarkDone),
    ]
}

fn pick<T: Copy>(items: &[T], index: usize) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        Some(items[index % items.len()])
    }
}

fn run(coordinator: &WriteCoordinator, op: &Op) {
    let store = coordinator.store();
    let lists: Vec<ListId> = store.query_lists(ListQuery::all()).ids();
    let tasks: Vec<TaskId> = store.query_tasks(TaskQuery::all()).ids();
    match op {
        Op::AddList(name) => {
            coordinator.add_list(name).unwrap();
        }
        Op::AddTask(i, name) => {
            if let Some(list) = pick(&lists, *i) {
                coordinator.add_task(list, name, "").unwrap();
            }
        }
        Op::Rename(i, name) => {
            if let Some(task) = pick(&tasks, *i) {
                coordinator.edit_task(task, name, "").unwrap();
            }
        }
        Op::Toggle(i) => {
            if let Some(task) = pick(&tasks, *i) {
                coordinator.toggle_task(task).unwrap();
            }
        }
        Op::DeleteTask(i) => {
            if let Some(task) = pick(&tasks, *i) {
                coordinator.delete_task(task).unwrap();
            }
        }
        Op::DeleteList(i) => {
            if let Some(list) = pick(&lists, *i) {
                coordinator.delete_list(list).unwrap();
            }
        }
        Op::MarkDone(i) => {
            if let Some(list) = pick(&lists, *i) {
                coordinator.mark_list_done(list).unwrap();
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_subscription_tracks_live_results(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let coordinator = WriteCoordinator::new(Arc::clone(&store));

        let query = TaskQuery::all()
            .filter(Predicate::eq(TaskField::IsComplete, false) | Predicate::contains(TaskField::Name, "a"))
            .sorted_by(TaskField::Name, true);
        let view = TaskView::new(query.clone())
            .grouped_by(TaskField::IsComplete)
            .with_sections([(false, "Current"), (true, "Complete")]);
        let handle = store.subscribe_tasks(view).unwrap();
        let (_, mut ordering) = expect_initial(&handle);

        for op in &ops {
            run(&coordinator, op);
            while let Ok(event) = handle.try_recv() {
                match event {
                    SubscriptionEvent::Update { snapshot, ordering: next, changes, .. } => {
                        prop_assert_eq!(changes.apply(&ordering, &next), next.clone());
                        prop_assert_eq!(snapshot.len(), next.len());
                        ordering = next;
                    }
                    other => prop_assert!(false, "unexpected event {:?}", other),
                }
            }
            let live = store.query_tasks(query.clone());
            prop_assert_eq!(live.len(), ordering.len());
            prop_assert_eq!(live.ids(), ordering.clone());
        }
    }
}
