use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dates::{format_display_time, parse_date_key, parse_reminder_time};
use crate::deferred::Deferred;
use crate::events::{EventBus, PlannerEvent};
use crate::model::{MonthCollection, Task};
use crate::notify::NotificationSink;

pub const REMINDER_TITLE: &str = "Task reminder";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderSettings {
    /// How long before the reminder time the notification fires.
    pub lead: Duration,
    /// Fire times further out than this are never armed.
    pub horizon: Duration,
    /// Bursts of `update_reminders` calls within this window coalesce.
    pub debounce: Duration,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            lead: Duration::from_secs(10 * 60),
            horizon: Duration::from_secs(24 * 60 * 60),
            debounce: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingId,
    MissingText,
    NoReminderTime,
    MalformedReminderTime,
    Completed,
    NotToday,
    AlreadyPassed,
    BeyondHorizon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Armed {
        fire_at: NaiveDateTime,
        delay: Duration,
    },
    Skipped(SkipReason),
}

impl ScheduleOutcome {
    pub fn is_armed(&self) -> bool {
        matches!(self, ScheduleOutcome::Armed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReminder {
    pub task_id: String,
    pub date_key: String,
    pub text: String,
    pub fire_at: NaiveDateTime,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub armed: usize,
    pub recomputes: u64,
    pub fired: u64,
}

/// The day a task counts for: its `due` override, else the day it is filed under.
pub fn effective_date_key<'a>(date_key: &'a str, task: &'a Task) -> &'a str {
    task.due
        .as_deref()
        .map(str::trim)
        .filter(|due| !due.is_empty())
        .unwrap_or(date_key)
}

/// Everything about a task that makes it eligible for a reminder today,
/// apart from the firing window.
pub fn check_schedulable(
    date_key: &str,
    task: &Task,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveTime), SkipReason> {
    if task.id.trim().is_empty() {
        return Err(SkipReason::MissingId);
    }
    if task.text.trim().is_empty() {
        return Err(SkipReason::MissingText);
    }
    let raw = task
        .reminder_time
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(SkipReason::NoReminderTime)?;
    let time = parse_reminder_time(raw).ok_or(SkipReason::MalformedReminderTime)?;
    if task.completed {
        return Err(SkipReason::Completed);
    }
    let date = parse_date_key(effective_date_key(date_key, task)).ok_or(SkipReason::NotToday)?;
    if date != today {
        return Err(SkipReason::NotToday);
    }
    Ok((date, time))
}

pub fn reminder_fire_at(date: NaiveDate, time: NaiveTime, lead: Duration) -> Option<NaiveDateTime> {
    let lead = chrono::Duration::from_std(lead).ok()?;
    date.and_time(time).checked_sub_signed(lead)
}

/// Delay until `fire_at`, if it is strictly in the future and within `horizon`.
pub fn fire_delay(
    now: NaiveDateTime,
    fire_at: NaiveDateTime,
    horizon: Duration,
) -> Result<Duration, SkipReason> {
    let delta = fire_at - now;
    if delta <= chrono::Duration::zero() {
        return Err(SkipReason::AlreadyPassed);
    }
    let delay = delta.to_std().map_err(|_| SkipReason::AlreadyPassed)?;
    if delay > horizon {
        return Err(SkipReason::BeyondHorizon);
    }
    Ok(delay)
}

pub fn reminder_dedupe_key(task_id: &str) -> String {
    format!("reminder-{task_id}")
}

fn reminder_body(task: &Task, time: NaiveTime) -> String {
    let at = task
        .time
        .clone()
        .unwrap_or_else(|| format_display_time(time));
    format!("{} is due at {}", task.text.trim(), at)
}

struct ArmedReminder {
    date_key: String,
    task: Task,
    fire_at: NaiveDateTime,
    delay: Duration,
    generation: u64,
    timer: Deferred,
}

#[derive(Default)]
struct SchedulerState {
    armed: HashMap<String, ArmedReminder>,
    last_snapshot: Option<Arc<MonthCollection>>,
    pending_update: Option<Deferred>,
    next_generation: u64,
    recomputes: u64,
    fired: u64,
}

struct Shared {
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    events: EventBus,
    settings: ReminderSettings,
    state: Mutex<SchedulerState>,
}

/// Timed notifications for today's tasks.
///
/// Holds at most one armed timer per task id. Each timer is a `Deferred`
/// tagged with a generation, so a timer that loses a race with a re-arm
/// finds a newer generation and stands down.
#[derive(Clone)]
pub struct ReminderScheduler {
    shared: Arc<Shared>,
}

impl ReminderScheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        settings: ReminderSettings,
        events: EventBus,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                clock,
                sink,
                events,
                settings,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    pub fn settings(&self) -> ReminderSettings {
        self.shared.settings
    }

    /// Arm (or re-arm) the reminder for one task filed under `date_key`.
    pub fn schedule_reminder(&self, date_key: &str, task: &Task) -> ScheduleOutcome {
        let mut state = self.shared.state.lock();
        self.arm_locked(&mut state, date_key, task)
    }

    /// Returns `true` if a timer was armed for `task_id`.
    pub fn cancel_reminder(&self, task_id: &str) -> bool {
        let mut state = self.shared.state.lock();
        match state.armed.remove(task_id) {
            Some(armed) => {
                armed.timer.cancel();
                debug!(task_id, "reminder cancelled");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all_reminders(&self) {
        let mut state = self.shared.state.lock();
        if let Some(pending) = state.pending_update.take() {
            pending.cancel();
        }
        for (_, armed) in state.armed.drain() {
            armed.timer.cancel();
        }
        state.last_snapshot = None;
    }

    /// Debounced full recompute against `snapshot`. Calls within the
    /// debounce window coalesce into one recompute of the latest snapshot;
    /// a snapshot that is the same allocation as the last one processed
    /// is skipped.
    pub fn update_reminders(&self, snapshot: Arc<MonthCollection>) {
        let mut state = self.shared.state.lock();
        if let Some(pending) = state.pending_update.take() {
            pending.cancel();
        }
        if state
            .last_snapshot
            .as_ref()
            .is_some_and(|last| Arc::ptr_eq(last, &snapshot))
        {
            debug!("reminder snapshot unchanged; skipping recompute");
            return;
        }
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        state.pending_update = Some(Deferred::spawn(self.shared.settings.debounce, move || {
            if let Some(shared) = weak.upgrade() {
                ReminderScheduler { shared }.recompute_now(snapshot);
            }
        }));
    }

    /// Cancel every armed timer and re-arm from `snapshot` immediately.
    /// Returns the number of armed reminders.
    pub fn recompute_now(&self, snapshot: Arc<MonthCollection>) -> usize {
        let mut state = self.shared.state.lock();
        if let Some(pending) = state.pending_update.take() {
            if pending.is_pending() {
                pending.cancel();
            }
        }
        if state
            .last_snapshot
            .as_ref()
            .is_some_and(|last| Arc::ptr_eq(last, &snapshot))
        {
            return state.armed.len();
        }

        for (_, armed) in state.armed.drain() {
            armed.timer.cancel();
        }
        for (date_key, day) in snapshot.iter() {
            for task in &day.tasks {
                self.arm_locked(&mut state, date_key, task);
            }
        }
        state.last_snapshot = Some(snapshot);
        state.recomputes += 1;
        debug!(armed = state.armed.len(), "reminders recomputed");
        state.armed.len()
    }

    /// Fire the armed reminder for `task_id` right away, re-validating it
    /// first. `false` when nothing is armed or the task no longer qualifies.
    pub fn fire_now(&self, task_id: &str) -> bool {
        self.fire(task_id, None)
    }

    pub fn is_armed(&self, task_id: &str) -> bool {
        self.shared.state.lock().armed.contains_key(task_id)
    }

    pub fn has_pending_update(&self) -> bool {
        self.shared
            .state
            .lock()
            .pending_update
            .as_ref()
            .is_some_and(Deferred::is_pending)
    }

    pub fn pending(&self) -> Vec<PendingReminder> {
        let state = self.shared.state.lock();
        let mut pending: Vec<PendingReminder> = state
            .armed
            .iter()
            .map(|(task_id, armed)| PendingReminder {
                task_id: task_id.clone(),
                date_key: armed.date_key.clone(),
                text: armed.task.text.clone(),
                fire_at: armed.fire_at,
                delay: armed.delay,
            })
            .collect();
        pending.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.task_id.cmp(&b.task_id)));
        pending
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.state.lock();
        SchedulerStats {
            armed: state.armed.len(),
            recomputes: state.recomputes,
            fired: state.fired,
        }
    }

    fn arm_locked(
        &self,
        state: &mut SchedulerState,
        date_key: &str,
        task: &Task,
    ) -> ScheduleOutcome {
        if let Some(previous) = state.armed.remove(&task.id) {
            previous.timer.cancel();
        }

        let settings = self.shared.settings;
        let now = self.shared.clock.now();
        let (date, time) = match check_schedulable(date_key, task, now.date()) {
            Ok(parts) => parts,
            Err(reason) => return ScheduleOutcome::Skipped(reason),
        };
        let Some(fire_at) = reminder_fire_at(date, time, settings.lead) else {
            return ScheduleOutcome::Skipped(SkipReason::AlreadyPassed);
        };
        let delay = match fire_delay(now, fire_at, settings.horizon) {
            Ok(delay) => delay,
            Err(reason) => {
                debug!(task_id = %task.id, ?reason, "reminder outside window");
                return ScheduleOutcome::Skipped(reason);
            }
        };

        state.next_generation += 1;
        let generation = state.next_generation;
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let task_id = task.id.clone();
        let timer = Deferred::spawn(delay, move || {
            if let Some(shared) = weak.upgrade() {
                ReminderScheduler { shared }.fire(&task_id, Some(generation));
            }
        });
        state.armed.insert(
            task.id.clone(),
            ArmedReminder {
                date_key: date_key.to_string(),
                task: task.clone(),
                fire_at,
                delay,
                generation,
                timer,
            },
        );
        debug!(task_id = %task.id, %fire_at, "reminder armed");
        ScheduleOutcome::Armed { fire_at, delay }
    }

    fn fire(&self, task_id: &str, generation: Option<u64>) -> bool {
        let (date_key, task) = {
            let mut state = self.shared.state.lock();
            let matches = state
                .armed
                .get(task_id)
                .is_some_and(|armed| generation.map_or(true, |g| g == armed.generation));
            if !matches {
                return false;
            }
            let Some(armed) = state.armed.remove(task_id) else {
                return false;
            };
            if armed.timer.is_pending() {
                armed.timer.cancel();
            }
            // The live snapshot may have moved on since arming.
            let latest = state.last_snapshot.as_ref().and_then(|snapshot| {
                snapshot.iter().find_map(|(key, day)| {
                    day.task(task_id).map(|task| (key.clone(), task.clone()))
                })
            });
            latest.unwrap_or((armed.date_key, armed.task))
        };

        let today = self.shared.clock.today();
        let time = match check_schedulable(&date_key, &task, today) {
            Ok((_, time)) => time,
            Err(reason) => {
                debug!(task_id, ?reason, "reminder no longer applies");
                return false;
            }
        };

        let body = reminder_body(&task, time);
        match self
            .shared
            .sink
            .show(REMINDER_TITLE, &body, &reminder_dedupe_key(task_id))
        {
            Ok(_) => {
                info!(task_id, "reminder fired");
                self.shared.state.lock().fired += 1;
                self.shared.events.emit(PlannerEvent::ReminderFired {
                    task_id: task_id.to_string(),
                });
                true
            }
            Err(err) => {
                warn!(task_id, "failed to show reminder: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 6, 1)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .expect("datetime")
    }

    fn task(id: &str, reminder: Option<&str>) -> Task {
        let mut task = Task::new("call the dentist");
        task.id = id.to_string();
        task.reminder_time = reminder.map(str::to_string);
        task
    }

    #[test]
    fn schedulability_filters() {
        let today = at(9, 0).date();
        assert_eq!(
            check_schedulable("2026-06-01", &task("", Some("10:00")), today),
            Err(SkipReason::MissingId)
        );
        assert_eq!(
            check_schedulable("2026-06-01", &task("a", None), today),
            Err(SkipReason::NoReminderTime)
        );
        assert_eq!(
            check_schedulable("2026-06-01", &task("a", Some("25:00")), today),
            Err(SkipReason::MalformedReminderTime)
        );
        assert_eq!(
            check_schedulable("2026-06-02", &task("a", Some("10:00")), today),
            Err(SkipReason::NotToday)
        );
        let mut done = task("a", Some("10:00"));
        done.completed = true;
        assert_eq!(
            check_schedulable("2026-06-01", &done, today),
            Err(SkipReason::Completed)
        );
        let mut due_today = task("a", Some("10:00"));
        due_today.due = Some("2026-06-01".to_string());
        assert!(check_schedulable("2026-05-30", &due_today, today).is_ok());
    }

    #[test]
    fn fire_delay_window() {
        let horizon = Duration::from_secs(24 * 3600);
        assert_eq!(
            fire_delay(at(9, 0), at(9, 0), horizon),
            Err(SkipReason::AlreadyPassed)
        );
        assert_eq!(
            fire_delay(at(9, 0), at(9, 5), horizon),
            Ok(Duration::from_secs(300))
        );
        let far = at(9, 0) + chrono::Duration::hours(30);
        assert_eq!(fire_delay(at(9, 0), far, horizon), Err(SkipReason::BeyondHorizon));
    }

    #[test]
    fn fire_time_subtracts_lead() {
        let time = NaiveTime::from_hms_opt(0, 5, 0).expect("time");
        let date = at(0, 0).date();
        let fire_at = reminder_fire_at(date, time, Duration::from_secs(600)).expect("fire at");
        assert_eq!(fire_at, at(0, 5) - chrono::Duration::minutes(10));
    }
}
