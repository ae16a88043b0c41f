use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dates::{
    format_display_time, format_reminder_time, month_key_for_date, parse_date_key,
    parse_display_time, parse_reminder_time,
};
use crate::error::{validate_text, PlannerError, ValidationError};
use crate::events::{EventBus, Notice, PlannerEvent};
use crate::local_store::{load_dataset, load_json, save_dataset, save_json, LocalStore};
use crate::merge::{merge_dataset, merge_moments};
use crate::model::{new_id, Dataset, DayRecord, Moment, MonthCollection, Subtask, Task};
use crate::notify::{LogSink, NotificationSink};
use crate::reminder::{ReminderScheduler, ReminderSettings};
use crate::remote_store::{RemoteStore, StoreError};
use crate::streak::{
    StreakChange, StreakState, StreakTracker, STREAK_META_NAME, STREAK_STORAGE_KEY,
};
use crate::transfer::{export_json, ImportReport, ImportedData};
use crate::ui_state::UiState;
use crate::write_order::{run_batch, WriteOrder};

pub const MOMENTS_STORAGE_KEY: &str = "todo-moments";

/// Collaborators a `Planner` is built from.
pub struct PlannerDeps {
    pub local: Arc<dyn LocalStore>,
    pub remote: Option<Arc<dyn RemoteStore>>,
    pub clock: Arc<dyn Clock>,
    pub sink: Arc<dyn NotificationSink>,
    pub settings: ReminderSettings,
    pub events: EventBus,
}

impl PlannerDeps {
    /// Local store only, notifications to the log, no event receiver.
    pub fn offline(local: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            local,
            remote: None,
            clock,
            sink: Arc::new(LogSink),
            settings: ReminderSettings::default(),
            events: EventBus::detached(),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_settings(mut self, settings: ReminderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}

/// Owns everything the UI works against: the month on screen, the streak,
/// the reminder scheduler, moments and view flags.
///
/// Every task or note mutation runs the same pipeline: apply in memory,
/// persist locally, push to the remote store in the background, update the
/// streak when the day is today, publish, then recompute reminders.
pub struct Planner {
    pub(crate) local: Arc<dyn LocalStore>,
    pub(crate) remote: Option<Arc<dyn RemoteStore>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: EventBus,
    pub(crate) reminders: ReminderScheduler,
    pub(crate) session: Option<String>,
    pub(crate) month_key: String,
    pub(crate) month: Arc<MonthCollection>,
    pub(crate) streak: StreakTracker,
    pub(crate) moments: Vec<Moment>,
    pub(crate) ui: UiState,
    pending: JoinSet<()>,
    writes: WriteOrder,
}

impl Planner {
    /// Opens the current month from the local store and runs the load-time
    /// streak check. Starts signed out.
    pub fn new(deps: PlannerDeps) -> Self {
        let PlannerDeps {
            local,
            remote,
            clock,
            sink,
            settings,
            events,
        } = deps;
        let month_key = month_key_for_date(clock.today());
        let month = Arc::new(local.get(&month_key).unwrap_or_default());
        let streak = StreakTracker::new(
            load_json::<StreakState>(&*local, STREAK_STORAGE_KEY).unwrap_or_default(),
        );
        let moments = merge_moments(
            &load_json::<Vec<Moment>>(&*local, MOMENTS_STORAGE_KEY).unwrap_or_default(),
            &[],
        );
        let reminders =
            ReminderScheduler::new(Arc::clone(&clock), sink, settings, events.clone());

        let mut planner = Self {
            local,
            remote,
            clock,
            events,
            reminders,
            session: None,
            month_key,
            month,
            streak,
            moments,
            ui: UiState::new(),
            pending: JoinSet::new(),
            writes: WriteOrder::new(),
        };
        planner.check_streak();
        planner.sync_reminders();
        planner
    }

    pub fn month_key(&self) -> &str {
        &self.month_key
    }

    pub fn month(&self) -> &Arc<MonthCollection> {
        &self.month
    }

    /// A day from the month on screen, or from the local store otherwise.
    pub fn day(&self, date_key: &str) -> Option<DayRecord> {
        let date = parse_date_key(date_key)?;
        let month_key = month_key_for_date(date);
        if month_key == self.month_key {
            return self.month.get(date_key).cloned();
        }
        self.local
            .get(&month_key)
            .and_then(|mut month| month.remove(date_key))
    }

    pub fn streak(&self) -> &StreakState {
        self.streak.state()
    }

    pub fn moments(&self) -> &[Moment] {
        &self.moments
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut UiState {
        &mut self.ui
    }

    pub fn reminders(&self) -> &ReminderScheduler {
        &self.reminders
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.is_some()
    }

    pub fn today_key(&self) -> String {
        crate::dates::date_key(self.clock.today())
    }

    /// Remote writes started in the background and not yet joined.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every background remote write to finish.
    pub async fn settle(&mut self) {
        while let Some(joined) = self.pending.join_next().await {
            if let Err(err) = joined {
                warn!("remote write task did not complete: {err}");
            }
        }
    }

    /// Reset the streak if a day was missed. Also runs at construction.
    pub fn check_streak(&mut self) -> Option<StreakChange> {
        let change = self.streak.check_missed_day(self.clock.today())?;
        self.publish_streak(change);
        Some(change)
    }

    pub fn add_task(
        &mut self,
        date_key: &str,
        text: &str,
        time: Option<&str>,
        reminder_time: Option<&str>,
    ) -> Result<Task, PlannerError> {
        let mut task = Task::new(validate_text(text)?);
        task.time = normalize_time(time)?;
        task.reminder_time = normalize_reminder_time(reminder_time)?;
        let created = task.clone();
        self.mutate_day(date_key, move |day| {
            day.tasks.push(task);
            Ok(())
        })?;
        debug!(task_id = %created.id, date_key, "task added");
        Ok(created)
    }

    /// Flip completion. Completing a task also checks off its subtasks.
    /// Returns the new state.
    pub fn toggle_task(&mut self, date_key: &str, task_id: &str) -> Result<bool, PlannerError> {
        let completed = self.mutate_task(date_key, task_id, |task| {
            task.completed = !task.completed;
            if task.completed {
                for subtask in &mut task.subtasks {
                    subtask.completed = true;
                }
            }
            Ok(task.completed)
        })?;
        if completed {
            self.reminders.cancel_reminder(task_id);
        }
        Ok(completed)
    }

    pub fn delete_task(&mut self, date_key: &str, task_id: &str) -> Result<Task, PlannerError> {
        let removed = self.mutate_day(date_key, |day| {
            let index = day
                .tasks
                .iter()
                .position(|task| task.id == task_id)
                .ok_or_else(|| PlannerError::NotFound(format!("task {task_id}")))?;
            Ok(day.tasks.remove(index))
        })?;
        self.reminders.cancel_reminder(task_id);
        self.ui.forget(task_id);
        Ok(removed)
    }

    pub fn edit_task_text(
        &mut self,
        date_key: &str,
        task_id: &str,
        text: &str,
    ) -> Result<(), PlannerError> {
        let text = validate_text(text)?;
        self.mutate_task(date_key, task_id, move |task| {
            task.text = text;
            Ok(())
        })
    }

    /// Set or clear (`None` or blank) the display time.
    pub fn set_task_time(
        &mut self,
        date_key: &str,
        task_id: &str,
        time: Option<&str>,
    ) -> Result<(), PlannerError> {
        let time = normalize_time(time)?;
        self.mutate_task(date_key, task_id, move |task| {
            task.time = time;
            Ok(())
        })
    }

    /// Set or clear the `HH:MM` reminder time.
    pub fn set_reminder_time(
        &mut self,
        date_key: &str,
        task_id: &str,
        reminder_time: Option<&str>,
    ) -> Result<(), PlannerError> {
        let reminder_time = normalize_reminder_time(reminder_time)?;
        let cleared = reminder_time.is_none();
        self.mutate_task(date_key, task_id, move |task| {
            task.reminder_time = reminder_time;
            Ok(())
        })?;
        if cleared {
            self.reminders.cancel_reminder(task_id);
        }
        Ok(())
    }

    pub fn add_subtask(
        &mut self,
        date_key: &str,
        task_id: &str,
        text: &str,
    ) -> Result<Subtask, PlannerError> {
        let subtask = Subtask::new(validate_text(text)?);
        let created = subtask.clone();
        self.mutate_task(date_key, task_id, move |task| {
            task.subtasks.push(subtask);
            Ok(())
        })?;
        Ok(created)
    }

    pub fn toggle_subtask(
        &mut self,
        date_key: &str,
        task_id: &str,
        subtask_id: &str,
    ) -> Result<bool, PlannerError> {
        self.mutate_task(date_key, task_id, |task| {
            let subtask = task
                .subtask_mut(subtask_id)
                .ok_or_else(|| PlannerError::NotFound(format!("subtask {subtask_id}")))?;
            subtask.completed = !subtask.completed;
            Ok(subtask.completed)
        })
    }

    pub fn delete_subtask(
        &mut self,
        date_key: &str,
        task_id: &str,
        subtask_id: &str,
    ) -> Result<Subtask, PlannerError> {
        self.mutate_task(date_key, task_id, |task| {
            let index = task
                .subtasks
                .iter()
                .position(|subtask| subtask.id == subtask_id)
                .ok_or_else(|| PlannerError::NotFound(format!("subtask {subtask_id}")))?;
            Ok(task.subtasks.remove(index))
        })
    }

    pub fn set_note(&mut self, date_key: &str, note: &str) -> Result<(), PlannerError> {
        let note = note.trim_end().to_string();
        self.mutate_day(date_key, move |day| {
            day.note = Some(note);
            Ok(())
        })
    }

    pub async fn add_moment(&mut self, text: &str, mood: &str) -> Result<Moment, PlannerError> {
        let moment = Moment {
            id: new_id(),
            text: validate_text(text)?,
            mood: mood.trim().to_string(),
            created_at: self.timestamp(),
            edited: false,
            edited_at: None,
        };
        let previous = self.moments.clone();
        self.moments.insert(0, moment.clone());
        self.save_moments();
        if let Some((remote, user)) = self.remote_session() {
            if let Err(err) = remote.add_moment(&user, &moment).await {
                return Err(self.rollback_moments(previous, err));
            }
        }
        Ok(moment)
    }

    /// A moment can be edited once. A second edit is a conflict whether
    /// this replica or the remote one notices first.
    pub async fn edit_moment(
        &mut self,
        moment_id: &str,
        text: &str,
    ) -> Result<Moment, PlannerError> {
        let text = validate_text(text)?;
        let index = self
            .moments
            .iter()
            .position(|moment| moment.id == moment_id)
            .ok_or_else(|| PlannerError::NotFound(format!("moment {moment_id}")))?;
        if self.moments[index].edited {
            self.events
                .notice(Notice::conflict("A moment can only be edited once."));
            return Err(PlannerError::Conflict(format!(
                "moment {moment_id} has already been edited"
            )));
        }

        let previous = self.moments.clone();
        let edited_at = self.timestamp();
        let moment = &mut self.moments[index];
        moment.text = text;
        moment.edited = true;
        moment.edited_at = Some(edited_at);
        let updated = moment.clone();
        self.save_moments();

        if let Some((remote, user)) = self.remote_session() {
            if let Err(err) = remote.update_moment(&user, &updated).await {
                return Err(self.rollback_moments(previous, err));
            }
        }
        Ok(updated)
    }

    pub async fn delete_moment(&mut self, moment_id: &str) -> Result<(), PlannerError> {
        let previous = self.moments.clone();
        let before = self.moments.len();
        self.moments.retain(|moment| moment.id != moment_id);
        if self.moments.len() == before {
            return Err(PlannerError::NotFound(format!("moment {moment_id}")));
        }
        self.save_moments();
        if let Some((remote, user)) = self.remote_session() {
            if let Err(err) = remote.delete_moment(&user, moment_id).await {
                return Err(self.rollback_moments(previous, err));
            }
        }
        Ok(())
    }

    /// Export every cached month plus moments.
    pub fn export(&self) -> Result<String, PlannerError> {
        let dataset = load_dataset(&*self.local);
        Ok(export_json(&dataset, &self.moments, &self.timestamp())?)
    }

    /// Merge imported data over the local cache, the import winning
    /// wherever both have a day. Imported months go to the remote store
    /// as one batch when signed in. An import that changes whether today
    /// is complete moves the streak like any other edit of today.
    pub fn import(&mut self, data: ImportedData) -> ImportReport {
        let ImportedData {
            months,
            moments,
            report,
        } = data;

        let today = self.clock.today();
        let today_key = crate::dates::date_key(today);
        let today_month = month_key_for_date(today);
        let today_complete = |dataset: &Dataset| {
            dataset
                .get(&today_month)
                .and_then(|month| month.get(&today_key))
                .is_some_and(DayRecord::is_complete)
        };

        let local = load_dataset(&*self.local);
        let merged = merge_dataset(&local, &months);
        let was_complete = today_complete(&local);
        let is_complete = today_complete(&merged);
        let touched: Dataset = months
            .keys()
            .filter_map(|key| merged.get(key).map(|month| (key.clone(), month.clone())))
            .collect();
        save_dataset(&*self.local, &touched);
        let current = touched.get(&self.month_key).cloned();
        if !touched.is_empty() {
            let tickets = self.writes.issue_all(&touched);
            self.spawn_remote("upload the import", true, move |remote, user| async move {
                run_batch(tickets, touched, |batch| async move {
                    remote.batch_set_months(&user, &batch).await
                })
                .await
                .map(drop)
            });
        }

        let known: HashSet<String> = self.moments.iter().map(|m| m.id.clone()).collect();
        let fresh: Vec<Moment> = moments
            .iter()
            .filter(|moment| !known.contains(&moment.id))
            .cloned()
            .collect();
        self.moments = merge_moments(&self.moments, &moments);
        self.save_moments();
        if !fresh.is_empty() {
            self.spawn_remote("upload imported moments", true, move |remote, user| async move {
                for moment in &fresh {
                    remote.add_moment(&user, moment).await?;
                }
                Ok::<(), StoreError>(())
            });
        }

        if let Some(month) = current {
            self.month = Arc::new(month);
            self.emit_month();
        }
        if let Some(change) = self.streak.record_today(today, was_complete, is_complete) {
            self.publish_streak(change);
        }
        self.sync_reminders();
        info!(
            months = report.months,
            days = report.days,
            moments = report.moments,
            "import applied"
        );
        report
    }

    fn mutate_task<R>(
        &mut self,
        date_key: &str,
        task_id: &str,
        apply: impl FnOnce(&mut Task) -> Result<R, PlannerError>,
    ) -> Result<R, PlannerError> {
        self.mutate_day(date_key, |day| {
            let task = day
                .task_mut(task_id)
                .ok_or_else(|| PlannerError::NotFound(format!("task {task_id}")))?;
            apply(task)
        })
    }

    /// Apply `apply` to one day and run the full persistence pipeline.
    /// A failing `apply` leaves every store untouched.
    fn mutate_day<R>(
        &mut self,
        date_key: &str,
        apply: impl FnOnce(&mut DayRecord) -> Result<R, PlannerError>,
    ) -> Result<R, PlannerError> {
        let date = parse_date_key(date_key)
            .ok_or_else(|| ValidationError::MalformedDateKey(date_key.to_string()))?;
        let month_key = month_key_for_date(date);
        let on_screen = month_key == self.month_key;
        let mut month = if on_screen {
            (*self.month).clone()
        } else {
            self.local.get(&month_key).unwrap_or_default()
        };

        let was_complete = month.get(date_key).is_some_and(DayRecord::is_complete);
        let day = month.entry(date_key.to_string()).or_default();
        let result = apply(day)?;
        let is_complete = day.is_complete();

        self.local.set(&month_key, &month);
        let month = Arc::new(month);
        if on_screen {
            self.month = Arc::clone(&month);
        }

        let key = month_key.clone();
        let snapshot = Arc::clone(&month);
        let ticket = self.writes.issue(&month_key);
        self.spawn_remote("save your changes", true, move |remote, user| async move {
            ticket
                .run(remote.set_month(&user, &key, &snapshot))
                .await
                .map(drop)
        });

        let today = self.clock.today();
        if date == today {
            if let Some(change) = self.streak.record_today(today, was_complete, is_complete) {
                self.publish_streak(change);
            }
        }

        self.events.emit(PlannerEvent::DatasetChanged {
            month_key: month_key.clone(),
            month: Arc::clone(&month),
        });
        if month_key == month_key_for_date(today) {
            self.reminders.update_reminders(month);
        }
        Ok(result)
    }

    fn publish_streak(&mut self, change: StreakChange) {
        let state = self.streak.state().clone();
        save_json(&*self.local, STREAK_STORAGE_KEY, &state);
        match serde_json::to_value(&state) {
            Ok(value) => {
                let ticket = self.writes.issue(STREAK_META_NAME);
                self.spawn_remote("save your streak", false, move |remote, user| async move {
                    ticket
                        .run(remote.set_meta(&user, STREAK_META_NAME, &value))
                        .await
                        .map(drop)
                });
            }
            Err(err) => warn!("failed to encode streak: {err}"),
        }
        info!(streak = state.streak, ?change, "{}", change.message(&state));
        self.events
            .emit(PlannerEvent::StreakChanged { state, change });
    }

    fn rollback_moments(&mut self, previous: Vec<Moment>, err: StoreError) -> PlannerError {
        warn!("moment change rolled back: {err}");
        self.moments = previous;
        self.save_moments();
        let notice = match &err {
            StoreError::Conflict(_) => Notice::conflict(format!("Moment change rejected: {err}")),
            _ => Notice::warning(format!("Could not save moment: {err}")),
        };
        self.events.notice(notice);
        err.into()
    }

    pub(crate) fn save_moments(&self) {
        save_json(&*self.local, MOMENTS_STORAGE_KEY, &self.moments);
    }

    pub(crate) fn timestamp(&self) -> String {
        self.clock.now().format("%Y-%m-%dT%H:%M:%S").to_string()
    }

    pub(crate) fn remote_session(&self) -> Option<(Arc<dyn RemoteStore>, String)> {
        Some((self.remote.clone()?, self.session.clone()?))
    }

    pub(crate) fn remote_failed(&self, action: &str, err: &StoreError) {
        warn!(action, "remote store call failed: {err}");
        self.events
            .notice(Notice::warning(format!("Could not {action}: {err}")));
    }

    pub(crate) fn emit_month(&self) {
        self.events.emit(PlannerEvent::DatasetChanged {
            month_key: self.month_key.clone(),
            month: Arc::clone(&self.month),
        });
    }

    /// Point the scheduler at today's month, wherever the view is.
    pub(crate) fn sync_reminders(&self) {
        let today_key = month_key_for_date(self.clock.today());
        if self.month_key == today_key {
            self.reminders.update_reminders(Arc::clone(&self.month));
        } else {
            let month = self.local.get(&today_key).unwrap_or_default();
            self.reminders.update_reminders(Arc::new(month));
        }
    }

    /// Run a remote write without awaiting it. Failures are logged, and
    /// surfaced as a notice when `surface` is set.
    pub(crate) fn spawn_remote<F, Fut>(&mut self, action: &'static str, surface: bool, write: F)
    where
        F: FnOnce(Arc<dyn RemoteStore>, String) -> Fut,
        Fut: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        let Some((remote, user)) = self.remote_session() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!(action, "no async runtime; remote write skipped");
            return;
        };
        while self.pending.try_join_next().is_some() {}

        let events = self.events.clone();
        let write = write(remote, user);
        self.pending.spawn_on(
            async move {
                if let Err(err) = write.await {
                    warn!(action, "remote write failed: {err}");
                    if surface {
                        events.notice(Notice::warning(format!("Could not {action}: {err}")));
                    }
                }
            },
            &runtime,
        );
    }
}

/// Display time in canonical `hh:mm AM/PM`. 24h input is accepted too.
fn normalize_time(value: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(raw) = value.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    parse_display_time(raw)
        .or_else(|| parse_reminder_time(raw))
        .map(|time| Some(format_display_time(time)))
        .ok_or_else(|| ValidationError::MalformedTime(raw.to_string()))
}

fn normalize_reminder_time(value: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(raw) = value.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    parse_reminder_time(raw)
        .map(|time| Some(format_reminder_time(time)))
        .ok_or_else(|| ValidationError::MalformedReminderTime(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::local_store::MemoryLocalStore;
    use chrono::NaiveDate;

    fn planner() -> (Planner, Arc<MemoryLocalStore>) {
        let local = Arc::new(MemoryLocalStore::new());
        let date = NaiveDate::from_ymd_opt(2026, 5, 14).expect("date");
        let clock = Arc::new(ManualClock::at(date, 9, 0).expect("clock"));
        let planner = Planner::new(PlannerDeps::offline(local.clone(), clock));
        (planner, local)
    }

    #[test]
    fn times_are_normalized() {
        assert_eq!(normalize_time(Some("2:05 pm")), Ok(Some("02:05 PM".to_string())));
        assert_eq!(normalize_time(Some("14:05")), Ok(Some("02:05 PM".to_string())));
        assert_eq!(normalize_time(Some("  ")), Ok(None));
        assert_eq!(normalize_reminder_time(Some("7:30")), Ok(Some("07:30".to_string())));
        assert!(matches!(
            normalize_reminder_time(Some("25:00")),
            Err(ValidationError::MalformedReminderTime(_))
        ));
    }

    #[test]
    fn rejected_input_never_reaches_the_store() {
        let (mut planner, local) = planner();
        assert!(planner.add_task("2026-05-14", "   ", None, None).is_err());
        assert!(planner.add_task("2026-05-14", "x", Some("noon"), None).is_err());
        assert!(planner.add_task("14/05/2026", "x", None, None).is_err());
        assert!(local.get("todo-calendar-2026-05").is_none());
    }

    #[test]
    fn edits_outside_the_viewed_month_persist_without_moving_the_view() {
        let (mut planner, local) = planner();
        let task = planner
            .add_task("2026-06-02", "dentist", Some("9:15 AM"), None)
            .expect("add");
        assert_eq!(planner.month_key(), "todo-calendar-2026-05");
        assert!(planner.month().is_empty());
        let stored = local.get("todo-calendar-2026-06").expect("june");
        assert_eq!(stored["2026-06-02"].tasks, vec![task.clone()]);
        assert_eq!(planner.day("2026-06-02").expect("day").tasks[0].id, task.id);
    }

    #[test]
    fn completing_a_task_checks_its_subtasks() {
        let (mut planner, _) = planner();
        let task = planner.add_task("2026-05-14", "pack", None, None).expect("add");
        planner.add_subtask("2026-05-14", &task.id, "socks").expect("sub");
        assert!(planner.toggle_task("2026-05-14", &task.id).expect("toggle"));
        let day = planner.day("2026-05-14").expect("day");
        assert!(day.is_complete());
        assert_eq!(planner.streak().streak, 1);
    }
}
