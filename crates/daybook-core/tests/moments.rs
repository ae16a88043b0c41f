use std::sync::Arc;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc::UnboundedReceiver;

use daybook_core::clock::ManualClock;
use daybook_core::error::PlannerError;
use daybook_core::events::{drain, EventBus, NoticeKind, PlannerEvent};
use daybook_core::local_store::{load_json, save_json, MemoryLocalStore};
use daybook_core::model::Moment;
use daybook_core::planner::{Planner, PlannerDeps, MOMENTS_STORAGE_KEY};
use daybook_core::remote_store::MemoryRemoteStore;

const USER: &str = "ana";

fn open(
    local: &Arc<MemoryLocalStore>,
    remote: &Arc<MemoryRemoteStore>,
) -> (Planner, UnboundedReceiver<PlannerEvent>) {
    let today = NaiveDate::from_ymd_opt(2026, 3, 8).expect("date");
    let clock = Arc::new(ManualClock::at(today, 21, 30).expect("clock"));
    let (bus, rx) = EventBus::channel();
    let deps = PlannerDeps::offline(local.clone(), clock)
        .with_remote(remote.clone())
        .with_events(bus);
    let mut planner = Planner::new(deps);
    planner.resume_session(USER).expect("session");
    (planner, rx)
}

fn notice_kinds(rx: &mut UnboundedReceiver<PlannerEvent>) -> Vec<NoticeKind> {
    drain(rx)
        .into_iter()
        .filter_map(|event| match event {
            PlannerEvent::Notice(notice) => Some(notice.kind),
            _ => None,
        })
        .collect()
}

fn stored(local: &MemoryLocalStore) -> Vec<Moment> {
    load_json(local, MOMENTS_STORAGE_KEY).unwrap_or_default()
}

fn moment(id: &str, text: &str, edited: bool) -> Moment {
    Moment {
        id: id.to_string(),
        text: text.to_string(),
        mood: "calm".to_string(),
        created_at: "2026-03-01T10:00:00".to_string(),
        edited,
        edited_at: edited.then(|| "2026-03-02T10:00:00".to_string()),
    }
}

#[tokio::test]
async fn moments_are_saved_on_both_sides_and_edit_once() {
    let local = Arc::new(MemoryLocalStore::new());
    let remote = Arc::new(MemoryRemoteStore::new());
    let (mut planner, mut rx) = open(&local, &remote);

    let added = planner.add_moment("  first snow  ", "happy").await.expect("add");
    assert_eq!(added.text, "first snow");
    assert_eq!(added.created_at, "2026-03-08T21:30:00");
    assert_eq!(remote.moments(USER), vec![added.clone()]);
    assert_eq!(stored(&local), vec![added.clone()]);

    let edited = planner
        .edit_moment(&added.id, "first snow of the year")
        .await
        .expect("edit");
    assert!(edited.edited);
    assert_eq!(edited.edited_at.as_deref(), Some("2026-03-08T21:30:00"));
    assert_eq!(remote.moments(USER), vec![edited.clone()]);

    let again = planner.edit_moment(&added.id, "third try").await;
    assert!(matches!(again, Err(PlannerError::Conflict(_))));
    assert_eq!(planner.moments(), &[edited]);
    assert_eq!(notice_kinds(&mut rx), vec![NoticeKind::Conflict]);
}

#[tokio::test]
async fn remote_conflict_rolls_back_the_local_edit() {
    let local = Arc::new(MemoryLocalStore::new());
    let remote = Arc::new(MemoryRemoteStore::new());
    let mine = moment("m1", "quiet morning", false);
    save_json(&*local, MOMENTS_STORAGE_KEY, &vec![mine.clone()]);
    // Another device already spent the single edit.
    remote.seed_moment(USER, moment("m1", "quiet morning, coffee", true));
    let (mut planner, mut rx) = open(&local, &remote);

    let result = planner.edit_moment("m1", "quiet morning, tea").await;
    assert!(matches!(result, Err(PlannerError::Conflict(_))));
    assert_eq!(planner.moments(), &[mine.clone()]);
    assert_eq!(stored(&local), vec![mine]);
    assert_eq!(notice_kinds(&mut rx), vec![NoticeKind::Conflict]);
}

#[tokio::test]
async fn unreachable_remote_rolls_back_adds_and_deletes() {
    let local = Arc::new(MemoryLocalStore::new());
    let remote = Arc::new(MemoryRemoteStore::new());
    let kept = moment("m1", "kept", false);
    save_json(&*local, MOMENTS_STORAGE_KEY, &vec![kept.clone()]);
    remote.seed_moment(USER, kept.clone());
    let (mut planner, mut rx) = open(&local, &remote);
    remote.set_offline(true);

    assert!(planner.add_moment("lost", "sad").await.is_err());
    assert!(planner.delete_moment("m1").await.is_err());
    assert_eq!(planner.moments(), &[kept.clone()]);
    assert_eq!(stored(&local), vec![kept]);
    assert_eq!(
        notice_kinds(&mut rx),
        vec![NoticeKind::Warning, NoticeKind::Warning]
    );
}

#[tokio::test]
async fn deleting_removes_the_moment_everywhere() {
    let local = Arc::new(MemoryLocalStore::new());
    let remote = Arc::new(MemoryRemoteStore::new());
    let (mut planner, _rx) = open(&local, &remote);

    let first = planner.add_moment("one", "").await.expect("add");
    let second = planner.add_moment("two", "").await.expect("add");
    assert_eq!(planner.moments()[0].id, second.id);

    planner.delete_moment(&first.id).await.expect("delete");
    assert_eq!(planner.moments(), &[second.clone()]);
    assert_eq!(remote.moments(USER), vec![second]);
    assert!(matches!(
        planner.delete_moment(&first.id).await,
        Err(PlannerError::NotFound(_))
    ));
    assert!(matches!(
        planner.add_moment("   ", "").await,
        Err(PlannerError::Validation(_))
    ));
}
