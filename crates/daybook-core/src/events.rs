use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::model::MonthCollection;
use crate::streak::{StreakChange, StreakState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Info,
    Warning,
    /// The remote layer rejected an edit; the optimistic change was undone.
    Conflict,
}

/// A transient, dismissible message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Warning,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Conflict,
            message: message.into(),
        }
    }
}

/// Observation points for whatever renders the planner.
#[derive(Debug, Clone)]
pub enum PlannerEvent {
    DatasetChanged {
        month_key: String,
        month: Arc<MonthCollection>,
    },
    StreakChanged {
        state: StreakState,
        change: StreakChange,
    },
    ReminderFired {
        task_id: String,
    },
    Notice(Notice),
}

/// Fan-out for `PlannerEvent`s. A bus without a receiver drops events.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    tx: Option<mpsc::UnboundedSender<PlannerEvent>>,
}

impl EventBus {
    pub fn new(tx: mpsc::UnboundedSender<PlannerEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PlannerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: PlannerEvent) {
        if let Some(tx) = &self.tx {
            // A closed receiver only means nobody is watching any more.
            let _ = tx.send(event);
        }
    }

    pub fn notice(&self, notice: Notice) {
        self.emit(PlannerEvent::Notice(notice));
    }
}

/// Drain whatever is queued without waiting.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<PlannerEvent>) -> Vec<PlannerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
