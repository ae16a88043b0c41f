use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc::UnboundedReceiver;

use daybook_core::clock::ManualClock;
use daybook_core::dates::{date_key, month_key_for_date};
use daybook_core::events::{drain, EventBus, PlannerEvent};
use daybook_core::local_store::{load_json, save_json, LocalStore, MemoryLocalStore};
use daybook_core::model::{Dataset, DayRecord, MonthCollection, Task};
use daybook_core::planner::{Planner, PlannerDeps};
use daybook_core::streak::{StreakChange, StreakState, STREAK_STORAGE_KEY};
use daybook_core::transfer::ImportedData;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, 14).expect("date")
}

fn open(
    local: &Arc<MemoryLocalStore>,
    on: NaiveDate,
) -> (Planner, UnboundedReceiver<PlannerEvent>) {
    let clock = Arc::new(ManualClock::at(on, 8, 0).expect("clock"));
    let (events, rx) = EventBus::channel();
    let deps = PlannerDeps::offline(local.clone(), clock).with_events(events);
    (Planner::new(deps), rx)
}

fn streak_changes(rx: &mut UnboundedReceiver<PlannerEvent>) -> Vec<StreakChange> {
    drain(rx)
        .into_iter()
        .filter_map(|event| match event {
            PlannerEvent::StreakChanged { change, .. } => Some(change),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn completion_revert_and_recompletion_never_double_count() {
    let local = Arc::new(MemoryLocalStore::new());
    let (mut planner, mut rx) = open(&local, today());
    let key = date_key(today());
    let task = planner.add_task(&key, "stretch", None, None).expect("add");
    assert_eq!(planner.streak(), &StreakState::default());

    planner.toggle_task(&key, &task.id).expect("complete");
    assert_eq!(planner.streak().streak, 1);
    assert_eq!(planner.streak().last_streak_date.as_deref(), Some(key.as_str()));

    planner.toggle_task(&key, &task.id).expect("uncomplete");
    assert_eq!(planner.streak().streak, 0);
    assert_eq!(planner.streak().last_streak_date, None);

    planner.toggle_task(&key, &task.id).expect("recomplete");
    assert_eq!(planner.streak().streak, 1);
    assert_eq!(planner.streak().last_streak_date.as_deref(), Some(key.as_str()));

    // Editing an already counted day keeps the count.
    planner.set_note(&key, "felt good").expect("note");
    assert_eq!(planner.streak().streak, 1);

    assert_eq!(
        streak_changes(&mut rx),
        vec![
            StreakChange::Started,
            StreakChange::Reverted,
            StreakChange::Started
        ]
    );
    let stored: StreakState = load_json(&*local, STREAK_STORAGE_KEY).expect("persisted");
    assert_eq!(&stored, planner.streak());
}

#[tokio::test]
async fn adding_an_open_task_reverts_today() {
    let local = Arc::new(MemoryLocalStore::new());
    let yesterday = date_key(today() - Duration::days(1));
    save_json(
        &*local,
        STREAK_STORAGE_KEY,
        &StreakState {
            streak: 4,
            last_streak_date: Some(yesterday),
        },
    );
    let (mut planner, _rx) = open(&local, today());
    let key = date_key(today());
    let first = planner.add_task(&key, "water plants", None, None).expect("add");
    planner.toggle_task(&key, &first.id).expect("complete");
    assert_eq!(planner.streak().streak, 5);

    planner.add_task(&key, "late errand", None, None).expect("add");
    assert_eq!(planner.streak().streak, 4);
    assert_eq!(planner.streak().last_streak_date, None);

    // Deleting the open task completes the day again.
    let open_task = planner.month()[&key].tasks[1].id.clone();
    planner.delete_task(&key, &open_task).expect("delete");
    assert_eq!(planner.streak().streak, 5);
}

#[tokio::test]
async fn stale_streak_resets_on_load() {
    let local = Arc::new(MemoryLocalStore::new());
    save_json(
        &*local,
        STREAK_STORAGE_KEY,
        &StreakState {
            streak: 7,
            last_streak_date: Some(date_key(today() - Duration::days(3))),
        },
    );
    let (planner, mut rx) = open(&local, today());
    assert_eq!(planner.streak(), &StreakState::default());
    assert_eq!(streak_changes(&mut rx), vec![StreakChange::Reset]);
    let stored: StreakState = load_json(&*local, STREAK_STORAGE_KEY).expect("persisted");
    assert_eq!(stored, StreakState::default());
}

#[tokio::test]
async fn a_reverted_count_survives_later_loads_and_builds_on() {
    let local = Arc::new(MemoryLocalStore::new());
    save_json(
        &*local,
        STREAK_STORAGE_KEY,
        &StreakState {
            streak: 4,
            last_streak_date: None,
        },
    );
    let later = today() + Duration::days(3);
    let (mut planner, mut rx) = open(&local, later);
    assert_eq!(planner.streak().streak, 4);
    assert_eq!(planner.streak().last_streak_date, None);
    assert_eq!(streak_changes(&mut rx), vec![]);

    let key = date_key(later);
    let task = planner.add_task(&key, "walk", None, None).expect("add");
    planner.toggle_task(&key, &task.id).expect("complete");
    assert_eq!(planner.streak().streak, 5);
    assert_eq!(planner.streak().last_streak_date.as_deref(), Some(key.as_str()));
    assert_eq!(streak_changes(&mut rx), vec![StreakChange::Increased]);
}

#[tokio::test]
async fn past_days_do_not_touch_the_streak() {
    let local = Arc::new(MemoryLocalStore::new());
    let (mut planner, _rx) = open(&local, today());
    let earlier = date_key(today() - Duration::days(2));
    let task = planner.add_task(&earlier, "old chore", None, None).expect("add");
    planner.toggle_task(&earlier, &task.id).expect("complete");
    assert_eq!(planner.streak().streak, 0);
    assert!(local.get("todo-calendar-2026-05").is_some());
}

fn imported_day(date: NaiveDate, tasks: Vec<Task>) -> ImportedData {
    let day = DayRecord { tasks, note: None };
    let month = MonthCollection::from([(date_key(date), day)]);
    ImportedData {
        months: Dataset::from([(month_key_for_date(date), month)]),
        ..ImportedData::default()
    }
}

#[tokio::test]
async fn importing_a_completed_today_counts_it() {
    let local = Arc::new(MemoryLocalStore::new());
    let (mut planner, mut rx) = open(&local, today());
    let mut done = Task::new("imported chore");
    done.completed = true;

    planner.import(imported_day(today(), vec![done]));
    let key = date_key(today());
    assert_eq!(planner.streak().streak, 1);
    assert_eq!(planner.streak().last_streak_date.as_deref(), Some(key.as_str()));
    assert_eq!(streak_changes(&mut rx), vec![StreakChange::Started]);
    let stored: StreakState = load_json(&*local, STREAK_STORAGE_KEY).expect("persisted");
    assert_eq!(&stored, planner.streak());

    // Importing an open task into the counted day takes the count back.
    let open_task = Task::new("imported errand");
    planner.import(imported_day(today(), vec![open_task]));
    assert_eq!(planner.streak().streak, 0);
    assert_eq!(streak_changes(&mut rx), vec![StreakChange::Reverted]);
}

#[tokio::test]
async fn importing_other_days_leaves_the_streak_alone() {
    let local = Arc::new(MemoryLocalStore::new());
    let (mut planner, mut rx) = open(&local, today());
    let mut done = Task::new("old chore");
    done.completed = true;
    planner.import(imported_day(today() - Duration::days(2), vec![done]));
    assert_eq!(planner.streak(), &StreakState::default());
    assert_eq!(streak_changes(&mut rx), vec![]);
}
