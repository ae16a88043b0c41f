use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "done")]
    pub completed: bool,
}

/// A task as persisted. UI-only flags never live here (see `ui_state`);
/// unknown fields written by older clients are dropped on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredTask")]
pub struct Task {
    pub id: String,
    pub text: String,
    pub completed: bool,
    /// Display time, `hh:mm AM/PM`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Reminder time, `HH:MM` (24h).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_time: Option<String>,
    /// Date key overriding the day the task is stored under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    pub subtasks: Vec<Subtask>,
}

/// Older clients wrote `title`/`done`, sometimes next to `text`/`completed`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTask {
    #[serde(default)]
    id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    completed: Option<bool>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    reminder_time: Option<String>,
    #[serde(default)]
    due: Option<String>,
    #[serde(default)]
    subtasks: Option<Vec<Subtask>>,
}

impl From<StoredTask> for Task {
    fn from(stored: StoredTask) -> Self {
        Task {
            id: stored.id,
            text: stored.text.or(stored.title).unwrap_or_default(),
            completed: stored.completed.unwrap_or(false) || stored.done.unwrap_or(false),
            time: stored.time,
            reminder_time: stored.reminder_time,
            due: stored.due,
            subtasks: stored.subtasks.unwrap_or_default(),
        }
    }
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            text: text.into(),
            completed: false,
            time: None,
            reminder_time: None,
            due: None,
            subtasks: Vec::new(),
        }
    }

    /// Complete when the task and every subtask are checked.
    pub fn is_fully_complete(&self) -> bool {
        self.completed && self.subtasks.iter().all(|sub| sub.completed)
    }

    pub fn subtask_mut(&mut self, subtask_id: &str) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|sub| sub.id == subtask_id)
    }
}

impl Subtask {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            text: text.into(),
            completed: false,
        }
    }
}

/// One calendar day. `note` stays optional on the wire so that a remote
/// copy can say "note explicitly set to empty" as opposed to "no note".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredDay")]
pub struct DayRecord {
    pub tasks: Vec<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Shapes a day has been stored in. Older builds wrote a bare task array.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredDay {
    Legacy(Vec<Task>),
    Record {
        #[serde(default)]
        tasks: Option<Vec<Task>>,
        #[serde(default)]
        note: Option<String>,
    },
}

impl From<StoredDay> for DayRecord {
    fn from(stored: StoredDay) -> Self {
        match stored {
            StoredDay::Legacy(tasks) => DayRecord::from_legacy(tasks),
            StoredDay::Record { tasks, note } => DayRecord {
                tasks: tasks.unwrap_or_default(),
                note,
            },
        }
    }
}

impl DayRecord {
    pub fn from_legacy(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            note: Some(String::new()),
        }
    }

    pub fn note(&self) -> &str {
        self.note.as_deref().unwrap_or("")
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.id == task_id)
    }

    /// At least one task, and every task and subtask checked.
    pub fn is_complete(&self) -> bool {
        is_day_complete(&self.tasks)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.note().is_empty()
    }
}

pub fn is_day_complete(tasks: &[Task]) -> bool {
    !tasks.is_empty() && tasks.iter().all(Task::is_fully_complete)
}

/// Day key (`YYYY-MM-DD`) -> day, for one calendar month.
pub type MonthCollection = BTreeMap<String, DayRecord>;

/// Month key (`todo-calendar-YYYY-MM`) -> month.
pub type Dataset = BTreeMap<String, MonthCollection>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Moment {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub mood: String,
    /// Local timestamp, `YYYY-MM-DDTHH:MM:SS`.
    pub created_at: String,
    #[serde(default)]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
}

pub fn new_id() -> String {
    Ulid::new().to_string().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn legacy_bare_array_upgrades_on_read() {
        let raw = r#"{
            "2026-03-01": [{"id": "a", "text": "water plants", "completed": true}],
            "2026-03-02": {"tasks": [], "note": "quiet day"}
        }"#;
        let month: MonthCollection = serde_json::from_str(raw).expect("parse");
        let legacy = &month["2026-03-01"];
        assert_eq!(legacy.note, Some(String::new()));
        assert_eq!(legacy.tasks.len(), 1);
        assert!(legacy.tasks[0].completed);
        assert_eq!(month["2026-03-02"].note(), "quiet day");
    }

    #[test]
    fn upgrade_is_idempotent_through_serialization() {
        let raw = r#"{"2026-03-01": [{"id": "a", "text": "x"}]}"#;
        let first: MonthCollection = serde_json::from_str(raw).expect("parse");
        let written = serde_json::to_string(&first).expect("write");
        let second: MonthCollection = serde_json::from_str(&written).expect("reparse");
        assert_eq!(first, second);
    }

    #[test]
    fn missing_note_stays_undefined_and_ui_flags_are_dropped() {
        let raw = r#"{"tasks": [{"id": "a", "text": "x", "done": true, "isEditing": true,
            "showSubtasks": true, "reminderTime": "09:30"}]}"#;
        let day: DayRecord = serde_json::from_str(raw).expect("parse");
        assert_eq!(day.note, None);
        assert!(day.tasks[0].completed);
        assert_eq!(day.tasks[0].reminder_time.as_deref(), Some("09:30"));
        let written = serde_json::to_value(&day).expect("write");
        assert!(written.get("note").is_none());
        assert!(written["tasks"][0].get("isEditing").is_none());
        assert_eq!(written["tasks"][0]["reminderTime"], "09:30");
    }

    #[test]
    fn day_completion_requires_tasks_and_subtasks() {
        let mut task = Task::new("stretch");
        assert!(!is_day_complete(&[]));
        task.completed = true;
        assert!(is_day_complete(std::slice::from_ref(&task)));
        task.subtasks.push(Subtask::new("neck"));
        assert!(!is_day_complete(std::slice::from_ref(&task)));
        task.subtasks[0].completed = true;
        assert!(is_day_complete(&[task]));
    }
}
