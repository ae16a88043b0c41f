use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::dates::is_month_key;
use crate::local_store::{is_valid_key, write_atomic};
use crate::model::{Dataset, Moment, MonthCollection};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Remote store unavailable: {0}")]
    Transient(String),
    #[error("Rejected by remote store: {0}")]
    Conflict(String),
    #[error("Not found in remote store: {0}")]
    NotFound(String),
    #[error("Invalid remote key: {0}")]
    InvalidKey(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Transient(format!("malformed document: {err}"))
    }
}

/// Per-user document store reconciled with the local cache at sync points.
/// Every call may fail transiently.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_month(
        &self,
        user_id: &str,
        month_key: &str,
    ) -> Result<Option<MonthCollection>, StoreError>;

    async fn get_all_months(&self, user_id: &str) -> Result<Dataset, StoreError>;

    async fn set_month(
        &self,
        user_id: &str,
        month_key: &str,
        month: &MonthCollection,
    ) -> Result<(), StoreError>;

    /// Write several month documents as one atomic unit.
    async fn batch_set_months(&self, user_id: &str, months: &Dataset) -> Result<(), StoreError>;

    async fn get_meta(&self, user_id: &str, name: &str) -> Result<Option<Value>, StoreError>;

    async fn set_meta(&self, user_id: &str, name: &str, value: &Value) -> Result<(), StoreError>;

    async fn list_moments(&self, user_id: &str) -> Result<Vec<Moment>, StoreError>;

    async fn add_moment(&self, user_id: &str, moment: &Moment) -> Result<(), StoreError>;

    /// Rejects with `Conflict` when the stored moment was already edited.
    async fn update_moment(&self, user_id: &str, moment: &Moment) -> Result<(), StoreError>;

    async fn delete_moment(&self, user_id: &str, moment_id: &str) -> Result<(), StoreError>;
}

fn check_moment_update(stored: &Moment) -> Result<(), StoreError> {
    if stored.edited {
        return Err(StoreError::Conflict(format!(
            "moment {} has already been edited",
            stored.id
        )));
    }
    Ok(())
}

#[derive(Debug, Default, Clone)]
struct UserDocs {
    months: Dataset,
    meta: BTreeMap<String, Value>,
    moments: Vec<Moment>,
}

#[derive(Debug, Default)]
struct MemoryRemoteState {
    users: BTreeMap<String, UserDocs>,
    offline: bool,
    failing_writes: usize,
    reads: usize,
    writes: usize,
    batches: usize,
}

impl MemoryRemoteState {
    fn read(&mut self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Transient("network unreachable".to_string()));
        }
        self.reads += 1;
        Ok(())
    }

    fn write(&mut self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Transient("network unreachable".to_string()));
        }
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StoreError::Transient("write rejected by backend".to_string()));
        }
        self.writes += 1;
        Ok(())
    }

    fn user(&mut self, user_id: &str) -> &mut UserDocs {
        self.users.entry(user_id.to_string()).or_default()
    }
}

/// In-process remote store with switchable failure modes.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryRemoteState>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Make the next `count` writes fail transiently.
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().failing_writes = count;
    }

    pub fn seed_month(&self, user_id: &str, month_key: &str, month: MonthCollection) {
        self.state
            .lock()
            .user(user_id)
            .months
            .insert(month_key.to_string(), month);
    }

    pub fn seed_moment(&self, user_id: &str, moment: Moment) {
        self.state.lock().user(user_id).moments.push(moment);
    }

    pub fn month(&self, user_id: &str, month_key: &str) -> Option<MonthCollection> {
        self.state
            .lock()
            .users
            .get(user_id)
            .and_then(|docs| docs.months.get(month_key).cloned())
    }

    pub fn months(&self, user_id: &str) -> Dataset {
        self.state
            .lock()
            .users
            .get(user_id)
            .map(|docs| docs.months.clone())
            .unwrap_or_default()
    }

    pub fn meta(&self, user_id: &str, name: &str) -> Option<Value> {
        self.state
            .lock()
            .users
            .get(user_id)
            .and_then(|docs| docs.meta.get(name).cloned())
    }

    pub fn moments(&self, user_id: &str) -> Vec<Moment> {
        self.state
            .lock()
            .users
            .get(user_id)
            .map(|docs| docs.moments.clone())
            .unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn batch_count(&self) -> usize {
        self.state.lock().batches
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_month(
        &self,
        user_id: &str,
        month_key: &str,
    ) -> Result<Option<MonthCollection>, StoreError> {
        let mut state = self.state.lock();
        state.read()?;
        Ok(state
            .users
            .get(user_id)
            .and_then(|docs| docs.months.get(month_key).cloned()))
    }

    async fn get_all_months(&self, user_id: &str) -> Result<Dataset, StoreError> {
        let mut state = self.state.lock();
        state.read()?;
        Ok(state
            .users
            .get(user_id)
            .map(|docs| docs.months.clone())
            .unwrap_or_default())
    }

    async fn set_month(
        &self,
        user_id: &str,
        month_key: &str,
        month: &MonthCollection,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.write()?;
        state
            .user(user_id)
            .months
            .insert(month_key.to_string(), month.clone());
        Ok(())
    }

    async fn batch_set_months(&self, user_id: &str, months: &Dataset) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.write()?;
        state.batches += 1;
        let docs = state.user(user_id);
        for (key, month) in months {
            docs.months.insert(key.clone(), month.clone());
        }
        Ok(())
    }

    async fn get_meta(&self, user_id: &str, name: &str) -> Result<Option<Value>, StoreError> {
        let mut state = self.state.lock();
        state.read()?;
        Ok(state
            .users
            .get(user_id)
            .and_then(|docs| docs.meta.get(name).cloned()))
    }

    async fn set_meta(&self, user_id: &str, name: &str, value: &Value) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.write()?;
        state
            .user(user_id)
            .meta
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    async fn list_moments(&self, user_id: &str) -> Result<Vec<Moment>, StoreError> {
        let mut state = self.state.lock();
        state.read()?;
        Ok(state
            .users
            .get(user_id)
            .map(|docs| docs.moments.clone())
            .unwrap_or_default())
    }

    async fn add_moment(&self, user_id: &str, moment: &Moment) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.write()?;
        let docs = state.user(user_id);
        docs.moments.retain(|existing| existing.id != moment.id);
        docs.moments.push(moment.clone());
        Ok(())
    }

    async fn update_moment(&self, user_id: &str, moment: &Moment) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.write()?;
        let docs = state.user(user_id);
        let stored = docs
            .moments
            .iter_mut()
            .find(|existing| existing.id == moment.id)
            .ok_or_else(|| StoreError::NotFound(moment.id.clone()))?;
        check_moment_update(stored)?;
        *stored = moment.clone();
        Ok(())
    }

    async fn delete_moment(&self, user_id: &str, moment_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.write()?;
        state
            .user(user_id)
            .moments
            .retain(|existing| existing.id != moment_id);
        Ok(())
    }
}

/// Remote store laid out as plain files, e.g. on a synced folder:
///
/// ```text
/// <root>/users/<user>/months/<monthKey>.json
/// <root>/users/<user>/meta/<name>.json
/// <root>/users/<user>/moments.json
/// ```
///
/// Every write holds an exclusive lock on `<root>/users/<user>/.lock`;
/// reads hold a shared one, so a batch write is seen whole or not at all.
#[derive(Debug, Clone)]
pub struct DirRemoteStore {
    root: PathBuf,
}

impl DirRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, user_id: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_key(user_id) {
            return Err(StoreError::InvalidKey(user_id.to_string()));
        }
        Ok(self.root.join("users").join(user_id))
    }

    fn month_path(&self, user_id: &str, month_key: &str) -> Result<PathBuf, StoreError> {
        if !is_month_key(month_key) {
            return Err(StoreError::InvalidKey(month_key.to_string()));
        }
        Ok(self
            .user_dir(user_id)?
            .join("months")
            .join(format!("{month_key}.json")))
    }

    fn meta_path(&self, user_id: &str, name: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_key(name) {
            return Err(StoreError::InvalidKey(name.to_string()));
        }
        Ok(self
            .user_dir(user_id)?
            .join("meta")
            .join(format!("{name}.json")))
    }

    fn moments_path(&self, user_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.user_dir(user_id)?.join("moments.json"))
    }

    /// File locks and reads block, so store calls run on tokio's blocking
    /// pool rather than on an async worker.
    async fn blocking<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(DirRemoteStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || work(store))
            .await
            .map_err(|err| StoreError::Transient(format!("file store task failed: {err}")))?
    }

    fn lock(&self, user_id: &str, exclusive: bool) -> Result<UserLock, StoreError> {
        let dir = self.user_dir(user_id)?;
        fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(dir.join(".lock"))?;
        if exclusive {
            file.lock_exclusive()?;
        } else {
            file.lock_shared()?;
        }
        Ok(UserLock { file })
    }

    fn read_moments(&self, user_id: &str) -> Result<Vec<Moment>, StoreError> {
        let path = self.moments_path(user_id)?;
        read_json(&path).map(Option::unwrap_or_default)
    }

    fn write_moments(&self, user_id: &str, moments: &[Moment]) -> Result<(), StoreError> {
        let path = self.moments_path(user_id)?;
        write_atomic(&path, &serde_json::to_string_pretty(moments)?)?;
        Ok(())
    }
}

struct UserLock {
    file: File,
}

impl Drop for UserLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl RemoteStore for DirRemoteStore {
    async fn get_month(
        &self,
        user_id: &str,
        month_key: &str,
    ) -> Result<Option<MonthCollection>, StoreError> {
        let (user_id, month_key) = (user_id.to_string(), month_key.to_string());
        self.blocking(move |store| {
            let path = store.month_path(&user_id, &month_key)?;
            let _lock = store.lock(&user_id, false)?;
            read_json(&path)
        })
        .await
    }

    async fn get_all_months(&self, user_id: &str) -> Result<Dataset, StoreError> {
        let user_id = user_id.to_string();
        self.blocking(move |store| {
            let months_dir = store.user_dir(&user_id)?.join("months");
            let _lock = store.lock(&user_id, false)?;
            let entries = match fs::read_dir(&months_dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(Dataset::new())
                }
                Err(err) => return Err(err.into()),
            };
            let mut dataset = Dataset::new();
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                let Some(key) = name.strip_suffix(".json") else {
                    continue;
                };
                if !is_month_key(key) {
                    continue;
                }
                if let Some(month) = read_json(&entry.path())? {
                    dataset.insert(key.to_string(), month);
                }
            }
            debug!(%user_id, months = dataset.len(), "loaded remote months");
            Ok(dataset)
        })
        .await
    }

    async fn set_month(
        &self,
        user_id: &str,
        month_key: &str,
        month: &MonthCollection,
    ) -> Result<(), StoreError> {
        let path = self.month_path(user_id, month_key)?;
        let raw = serde_json::to_string_pretty(month)?;
        let user_id = user_id.to_string();
        self.blocking(move |store| {
            let _lock = store.lock(&user_id, true)?;
            write_atomic(&path, &raw)?;
            Ok(())
        })
        .await
    }

    async fn batch_set_months(&self, user_id: &str, months: &Dataset) -> Result<(), StoreError> {
        // Validate and serialize everything before touching disk.
        let mut staged = Vec::with_capacity(months.len());
        for (key, month) in months {
            staged.push((self.month_path(user_id, key)?, serde_json::to_string_pretty(month)?));
        }
        let user_id = user_id.to_string();
        self.blocking(move |store| {
            let _lock = store.lock(&user_id, true)?;
            for (path, raw) in &staged {
                write_atomic(path, raw)?;
            }
            debug!(%user_id, months = staged.len(), "batch wrote remote months");
            Ok(())
        })
        .await
    }

    async fn get_meta(&self, user_id: &str, name: &str) -> Result<Option<Value>, StoreError> {
        let path = self.meta_path(user_id, name)?;
        let user_id = user_id.to_string();
        self.blocking(move |store| {
            let _lock = store.lock(&user_id, false)?;
            read_json(&path)
        })
        .await
    }

    async fn set_meta(&self, user_id: &str, name: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.meta_path(user_id, name)?;
        let raw = serde_json::to_string_pretty(value)?;
        let user_id = user_id.to_string();
        self.blocking(move |store| {
            let _lock = store.lock(&user_id, true)?;
            write_atomic(&path, &raw)?;
            Ok(())
        })
        .await
    }

    async fn list_moments(&self, user_id: &str) -> Result<Vec<Moment>, StoreError> {
        let user_id = user_id.to_string();
        self.blocking(move |store| {
            let _lock = store.lock(&user_id, false)?;
            store.read_moments(&user_id)
        })
        .await
    }

    async fn add_moment(&self, user_id: &str, moment: &Moment) -> Result<(), StoreError> {
        let (user_id, moment) = (user_id.to_string(), moment.clone());
        self.blocking(move |store| {
            let _lock = store.lock(&user_id, true)?;
            let mut moments = store.read_moments(&user_id)?;
            moments.retain(|existing| existing.id != moment.id);
            moments.push(moment);
            store.write_moments(&user_id, &moments)
        })
        .await
    }

    async fn update_moment(&self, user_id: &str, moment: &Moment) -> Result<(), StoreError> {
        let (user_id, moment) = (user_id.to_string(), moment.clone());
        self.blocking(move |store| {
            let _lock = store.lock(&user_id, true)?;
            let mut moments = store.read_moments(&user_id)?;
            let stored = moments
                .iter_mut()
                .find(|existing| existing.id == moment.id)
                .ok_or_else(|| StoreError::NotFound(moment.id.clone()))?;
            check_moment_update(stored)?;
            *stored = moment;
            store.write_moments(&user_id, &moments)
        })
        .await
    }

    async fn delete_moment(&self, user_id: &str, moment_id: &str) -> Result<(), StoreError> {
        let (user_id, moment_id) = (user_id.to_string(), moment_id.to_string());
        self.blocking(move |store| {
            let _lock = store.lock(&user_id, true)?;
            let mut moments = store.read_moments(&user_id)?;
            moments.retain(|existing| existing.id != moment_id);
            store.write_moments(&user_id, &moments)
        })
        .await
    }
}
