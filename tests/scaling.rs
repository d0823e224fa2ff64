//! Scaling tests with stores holding thousands of lists and tasks.
//!
//! Measures the operations that grow with store size:
//! - Population through the coordinator
//! - Reopen and journal replay
//! - Compaction
//! - Commits fanned out to many live subscriptions

use listkeeper::{
    ListField, ListQuery, ListView, Predicate, Store, StoreConfig, SubscriptionEvent, TaskField,
    TaskQuery, TaskView, WriteCoordinator,
};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

const LIST_COUNT: usize = 200;
const TASKS_PER_LIST: usize = 25;

fn test_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        path: dir.path().to_path_buf(),
        create_if_missing: true,
        sync_interval: 500,
    }
}

/// Timing helper
struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    fn report(&self) {
        println!("  {} took {:.2}ms", self.name, self.elapsed_ms());
    }

    fn report_with_count(&self, count: usize) {
        let ms = self.elapsed_ms();
        let per_item = if count > 0 { ms / count as f64 } else { 0.0 };
        println!(
            "  {} took {:.2}ms ({} items, {:.4}ms/item)",
            self.name, ms, count, per_item
        );
    }
}

fn populate(coordinator: &WriteCoordinator) {
    for l in 0..LIST_COUNT {
        let list = coordinator.add_list(&format!("list {:04}", l)).unwrap();
        for t in 0..TASKS_PER_LIST {
            let task = coordinator
                .add_task(list, &format!("task {:02}", t), "")
                .unwrap();
            if t % 3 == 0 {
                coordinator.toggle_task(task).unwrap();
            }
        }
    }
}

// =============================================================================
// Test: populate, reopen, compact
// =============================================================================

#[test]
fn test_scaling_populate_and_replay() {
    println!("\n=== {} lists x {} tasks ===", LIST_COUNT, TASKS_PER_LIST);

    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::create(test_config(&dir)).unwrap());
    let coordinator = WriteCoordinator::new(Arc::clone(&store));

    let timer = Timer::new("Populate");
    populate(&coordinator);
    let stats = store.stats();
    timer.report_with_count(stats.commits as usize);
    assert_eq!(stats.list_count as usize, LIST_COUNT);
    assert_eq!(stats.task_count as usize, LIST_COUNT * TASKS_PER_LIST);

    let pending_before = store
        .query_tasks(TaskQuery::all().filter(Predicate::eq(TaskField::IsComplete, false)))
        .len();

    store.sync().unwrap();
    drop(coordinator);
    drop(store);

    let timer = Timer::new("Reopen (replay journal)");
    let store = Store::open(test_config(&dir)).unwrap();
    timer.report();
    assert_eq!(store.stats().task_count as usize, LIST_COUNT * TASKS_PER_LIST);

    let timer = Timer::new("Compact");
    let summary = store.compact().unwrap();
    timer.report();
    println!(
        "  Journal {} -> {} bytes",
        summary.bytes_before, summary.bytes_after
    );

    drop(store);
    let timer = Timer::new("Reopen (compacted)");
    let store = Store::open(test_config(&dir)).unwrap();
    timer.report();

    let pending_after = store
        .query_tasks(TaskQuery::all().filter(Predicate::eq(TaskField::IsComplete, false)))
        .len();
    assert_eq!(pending_before, pending_after);

    println!("  ✓ Populate and replay test passed");
}

// =============================================================================
// Test: many subscriptions on a large store
// =============================================================================

#[test]
fn test_scaling_subscription_fanout() {
    println!("\n=== Subscription fan-out ===");

    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::create(test_config(&dir)).unwrap());
    let coordinator = WriteCoordinator::new(Arc::clone(&store));
    populate(&coordinator);

    let timer = Timer::new("Subscribe 50 views");
    let list_handles: Vec<_> = (0..25)
        .map(|_| {
            let view = ListView::new(ListQuery::all().sorted_by(ListField::PendingCount, false));
            store.subscribe_lists(view).unwrap()
        })
        .collect();
    let lists = store.query_lists(ListQuery::all()).ids();
    let task_handles: Vec<_> = (0..25)
        .map(|i| {
            let view = TaskView::new(TaskQuery::in_list(lists[i]))
                .grouped_by(TaskField::IsComplete)
                .with_sections([(false, "Current"), (true, "Complete")]);
            store.subscribe_tasks(view).unwrap()
        })
        .collect();
    timer.report_with_count(50);

    let timer = Timer::new("Mark 25 lists done");
    for list in &lists[..25] {
        coordinator.mark_list_done(*list).unwrap();
    }
    timer.report_with_count(25);

    // Every list view saw the same 25 commits.
    for handle in &list_handles {
        let mut updates = 0;
        while let Ok(event) = handle.try_recv() {
            if matches!(event, SubscriptionEvent::Update { .. }) {
                updates += 1;
            }
        }
        assert_eq!(updates, 25);
    }

    // Each task view saw only its own list's commit.
    for handle in &task_handles {
        let mut updates = 0;
        while let Ok(event) = handle.try_recv() {
            if let SubscriptionEvent::Update { snapshot, .. } = event {
                assert_eq!(snapshot.sections.len(), 1);
                updates += 1;
            }
        }
        assert_eq!(updates, 1);
    }

    println!("  ✓ Fan-out test passed");
}
