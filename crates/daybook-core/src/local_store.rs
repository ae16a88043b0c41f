use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::dates::{is_month_key, MONTH_KEY_PREFIX};
use crate::model::{Dataset, MonthCollection};

/// Synchronous key/value cache on the user's device. Never fails
/// observably: unreadable or unparsable entries read as absent and write
/// failures are logged.
pub trait LocalStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Option<String>;
    fn set_raw(&self, key: &str, value: &str);
    fn list_keys(&self, prefix: &str) -> Vec<String>;
    fn remove(&self, key: &str);

    fn get(&self, month_key: &str) -> Option<MonthCollection> {
        let raw = self.get_raw(month_key)?;
        match serde_json::from_str(&raw) {
            Ok(month) => Some(month),
            Err(err) => {
                warn!(key = month_key, "ignoring unreadable month: {err}");
                None
            }
        }
    }

    fn set(&self, month_key: &str, month: &MonthCollection) {
        match serde_json::to_string(month) {
            Ok(raw) => self.set_raw(month_key, &raw),
            Err(err) => warn!(key = month_key, "failed to serialize month: {err}"),
        }
    }
}

pub fn load_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Option<T> {
    let raw = store.get_raw(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, "ignoring unreadable entry: {err}");
            None
        }
    }
}

pub fn save_json<T: Serialize>(store: &dyn LocalStore, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(raw) => store.set_raw(key, &raw),
        Err(err) => warn!(key, "failed to serialize entry: {err}"),
    }
}

/// Every cached month.
pub fn load_dataset(store: &dyn LocalStore) -> Dataset {
    store
        .list_keys(MONTH_KEY_PREFIX)
        .into_iter()
        .filter(|key| is_month_key(key))
        .filter_map(|key| store.get(&key).map(|month| (key, month)))
        .collect()
}

pub fn save_dataset(store: &dyn LocalStore, dataset: &Dataset) {
    for (key, month) in dataset {
        store.set(key, month);
    }
}

#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get_raw(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set_raw(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }

    fn list_keys(&self, prefix: &str) -> Vec<String> {
        self.entries
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileLocalStore {
    dir: PathBuf,
}

impl FileLocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        if !is_valid_key(key) {
            warn!(key, "rejecting local store key");
            return None;
        }
        Some(self.dir.join(format!("{key}.json")))
    }
}

pub(crate) fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Write via a sibling temp file so readers never see a torn file.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

impl LocalStore for FileLocalStore {
    fn get_raw(&self, key: &str) -> Option<String> {
        let path = self.path_for(key)?;
        fs::read_to_string(path).ok()
    }

    fn set_raw(&self, key: &str, value: &str) {
        let Some(path) = self.path_for(key) else {
            return;
        };
        if let Err(err) = write_atomic(&path, value) {
            warn!(key, path = %path.display(), "failed to write local entry: {err}");
        }
    }

    fn list_keys(&self, prefix: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_suffix(".json").map(str::to_string)
            })
            .filter(|key| key.starts_with(prefix) && is_valid_key(key))
            .collect();
        keys.sort();
        keys
    }

    fn remove(&self, key: &str) {
        let Some(path) = self.path_for(key) else {
            return;
        };
        if path.exists() {
            if let Err(err) = fs::remove_file(&path) {
                warn!(key, "failed to remove local entry: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DayRecord, Task};
    use tempfile::TempDir;

    fn sample_month() -> MonthCollection {
        let mut task = Task::new("buy bread");
        task.id = "t1".to_string();
        MonthCollection::from([(
            "2026-02-03".to_string(),
            DayRecord {
                tasks: vec![task],
                note: Some("cold".to_string()),
            },
        )])
    }

    #[test]
    fn file_store_round_trip_and_listing() {
        let temp = TempDir::new().expect("tempdir");
        let store = FileLocalStore::new(temp.path().join("local"));
        assert!(store.get("todo-calendar-2026-02").is_none());

        store.set("todo-calendar-2026-02", &sample_month());
        store.set_raw("todo-streak", "{}");
        assert_eq!(store.get("todo-calendar-2026-02"), Some(sample_month()));
        assert_eq!(
            store.list_keys(MONTH_KEY_PREFIX),
            vec!["todo-calendar-2026-02".to_string()]
        );

        store.remove("todo-calendar-2026-02");
        assert!(store.get("todo-calendar-2026-02").is_none());
    }

    #[test]
    fn corrupt_entries_read_as_absent() {
        let temp = TempDir::new().expect("tempdir");
        let store = FileLocalStore::new(temp.path());
        store.set_raw("todo-calendar-2026-02", "{not json");
        assert!(store.get("todo-calendar-2026-02").is_none());
        assert!(load_dataset(&store).is_empty());
    }

    #[test]
    fn path_like_keys_are_rejected() {
        let temp = TempDir::new().expect("tempdir");
        let store = FileLocalStore::new(temp.path());
        store.set_raw("../escape", "x");
        assert!(store.get_raw("../escape").is_none());
        assert!(!temp.path().parent().expect("parent").join("escape.json").exists());
    }

    #[test]
    fn dataset_helpers_skip_non_month_keys() {
        let store = MemoryLocalStore::new();
        store.set("todo-calendar-2026-02", &sample_month());
        store.set_raw("todo-calendar-settings", "{}");
        let dataset = load_dataset(&store);
        assert_eq!(dataset.len(), 1);
        assert!(dataset.contains_key("todo-calendar-2026-02"));
    }
}
