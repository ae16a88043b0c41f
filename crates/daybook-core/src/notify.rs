use std::collections::BTreeMap;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifications unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationHandle {
    pub dedupe_key: String,
}

/// Delivers user-visible notifications. Implementations must dedupe by
/// key so a repeated fire for the same task replaces instead of stacking.
pub trait NotificationSink: Send + Sync {
    fn show(&self, title: &str, body: &str, dedupe_key: &str)
        -> Result<NotificationHandle, NotifyError>;
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn show(
        &self,
        title: &str,
        body: &str,
        dedupe_key: &str,
    ) -> Result<NotificationHandle, NotifyError> {
        info!(key = dedupe_key, "{title}: {body}");
        Ok(NotificationHandle {
            dedupe_key: dedupe_key.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShownNotification {
    pub title: String,
    pub body: String,
    pub dedupe_key: String,
    /// How many times this key was shown.
    pub times: usize,
}

/// Keeps the visible notification per key in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    shown: Mutex<BTreeMap<String, ShownNotification>>,
    unavailable: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, value: bool) {
        *self.unavailable.lock() = value;
    }

    pub fn visible(&self) -> Vec<ShownNotification> {
        self.shown.lock().values().cloned().collect()
    }

    pub fn total_shown(&self) -> usize {
        self.shown.lock().values().map(|n| n.times).sum()
    }

    pub fn get(&self, dedupe_key: &str) -> Option<ShownNotification> {
        self.shown.lock().get(dedupe_key).cloned()
    }
}

impl NotificationSink for MemorySink {
    fn show(
        &self,
        title: &str,
        body: &str,
        dedupe_key: &str,
    ) -> Result<NotificationHandle, NotifyError> {
        if *self.unavailable.lock() {
            return Err(NotifyError::Unavailable("permission denied".to_string()));
        }
        let mut shown = self.shown.lock();
        let times = shown.get(dedupe_key).map(|n| n.times).unwrap_or(0) + 1;
        shown.insert(
            dedupe_key.to_string(),
            ShownNotification {
                title: title.to_string(),
                body: body.to_string(),
                dedupe_key: dedupe_key.to_string(),
                times,
            },
        );
        Ok(NotificationHandle {
            dedupe_key: dedupe_key.to_string(),
        })
    }
}
