use serde::Serialize;
use serde_json::{json, Value};

use daybook_core::events::{NoticeKind, PlannerEvent};
use daybook_core::model::{DayRecord, Moment, MonthCollection, Task};
use daybook_core::notify::{NotificationHandle, NotificationSink, NotifyError};
use daybook_core::reminder::PendingReminder;
use daybook_core::streak::StreakState;

/// Prints reminders as they fire.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl NotificationSink for StdoutSink {
    fn show(
        &self,
        title: &str,
        body: &str,
        dedupe_key: &str,
    ) -> Result<NotificationHandle, NotifyError> {
        println!("{title}: {body}");
        Ok(NotificationHandle {
            dedupe_key: dedupe_key.to_string(),
        })
    }
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `{"ok": true, <key>: value}`, the envelope every `--json` reply uses.
pub fn ok_json<T: Serialize>(key: &str, value: &T) -> anyhow::Result<()> {
    let mut body = serde_json::Map::new();
    body.insert("ok".to_string(), Value::Bool(true));
    body.insert(key.to_string(), serde_json::to_value(value)?);
    print_json(&Value::Object(body))
}

/// Notices go to stderr so stdout stays parseable.
pub fn report_notices(events: &[PlannerEvent]) {
    for event in events {
        if let PlannerEvent::Notice(notice) = event {
            let label = match notice.kind {
                NoticeKind::Info => "note",
                NoticeKind::Warning => "warning",
                NoticeKind::Conflict => "conflict",
            };
            eprintln!("{label}: {}", notice.message);
        }
    }
}

fn task_line(task: &Task) -> String {
    let mark = if task.completed { "x" } else { " " };
    let mut line = format!("[{mark}] {}  {}", task.id, task.text);
    if let Some(time) = task.time.as_deref() {
        line.push_str(&format!("  @ {time}"));
    }
    if let Some(reminder) = task.reminder_time.as_deref() {
        line.push_str(&format!("  (remind {reminder})"));
    }
    line
}

pub fn print_day(date_key: &str, day: &DayRecord) {
    let done = if day.is_complete() { "  done" } else { "" };
    println!("{date_key}{done}");
    if !day.note().is_empty() {
        println!("  note: {}", day.note());
    }
    for task in &day.tasks {
        println!("  {}", task_line(task));
        for subtask in &task.subtasks {
            let mark = if subtask.completed { "x" } else { " " };
            println!("      [{mark}] {}  {}", subtask.id, subtask.text);
        }
    }
}

pub fn print_month(month_key: &str, month: &MonthCollection) {
    println!("{month_key}");
    let days: Vec<_> = month.iter().filter(|(_, day)| !day.is_empty()).collect();
    if days.is_empty() {
        println!("  nothing planned");
        return;
    }
    for (date_key, day) in days {
        print_day(date_key, day);
    }
}

pub fn streak_line(state: &StreakState) -> String {
    match state.last_streak_date.as_deref() {
        Some(last) => format!("streak: {} (last counted {last})", state.streak),
        None => format!("streak: {}", state.streak),
    }
}

pub fn print_moments(moments: &[Moment]) {
    if moments.is_empty() {
        println!("no moments yet");
        return;
    }
    for moment in moments {
        let mood = if moment.mood.is_empty() {
            String::new()
        } else {
            format!(" [{}]", moment.mood)
        };
        let edited = if moment.edited { " (edited)" } else { "" };
        println!(
            "{}  {}{mood}  {}{edited}",
            moment.id, moment.created_at, moment.text
        );
    }
}

pub fn pending_json(pending: &[PendingReminder]) -> Value {
    Value::Array(
        pending
            .iter()
            .map(|reminder| {
                json!({
                    "task_id": reminder.task_id,
                    "date_key": reminder.date_key,
                    "text": reminder.text,
                    "fire_at": reminder.fire_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
                    "delay_secs": reminder.delay.as_secs(),
                })
            })
            .collect(),
    )
}

pub fn print_pending(pending: &[PendingReminder]) {
    if pending.is_empty() {
        println!("no reminders armed for today");
        return;
    }
    for reminder in pending {
        println!(
            "{}  {}  {}",
            reminder.fire_at.format("%H:%M"),
            reminder.task_id,
            reminder.text
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_line_shows_times_and_state() {
        let mut task = Task::new("stretch");
        task.id = "t1".to_string();
        task.completed = true;
        task.time = Some("07:30 AM".to_string());
        task.reminder_time = Some("07:30".to_string());
        assert_eq!(
            task_line(&task),
            "[x] t1  stretch  @ 07:30 AM  (remind 07:30)"
        );
    }

    #[test]
    fn streak_line_mentions_last_day_when_counted() {
        let state = StreakState {
            streak: 3,
            last_streak_date: Some("2026-05-13".to_string()),
        };
        assert_eq!(streak_line(&state), "streak: 3 (last counted 2026-05-13)");
        assert_eq!(streak_line(&StreakState::default()), "streak: 0");
    }
}
