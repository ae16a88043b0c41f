use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dates::{is_month_key, month_key, parse_month_key, shift_month};
use crate::error::{PlannerError, ValidationError};
use crate::events::Notice;
use crate::local_store::{load_dataset, save_dataset, save_json};
use crate::merge::{merge_dataset_with_summary, merge_moments, MergeSummary};
use crate::model::{Dataset, MonthCollection};
use crate::planner::Planner;
use crate::streak::{StreakState, STREAK_META_NAME, STREAK_STORAGE_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakSource {
    Remote,
    Local,
    /// The remote store could not be asked.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub user_id: String,
    /// False when the remote store was unreachable and the session runs on
    /// local data alone.
    pub remote_ok: bool,
    pub summary: MergeSummary,
    /// Months written back to the remote store in the sign-in batch.
    pub pushed: Vec<String>,
    pub moments: usize,
    pub streak: StreakState,
    pub streak_source: StreakSource,
}

impl SyncReport {
    fn offline(user_id: String, streak: StreakState) -> Self {
        Self {
            user_id,
            remote_ok: false,
            summary: MergeSummary::default(),
            pushed: Vec::new(),
            moments: 0,
            streak,
            streak_source: StreakSource::Unknown,
        }
    }
}

/// Where the month on screen came from after a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshSource {
    Remote,
    Local,
}

impl Planner {
    /// Attach to `user_id` without reconciling, for a host that already
    /// synced this user earlier.
    pub fn resume_session(&mut self, user_id: &str) -> Result<(), PlannerError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ValidationError::EmptyUserId.into());
        }
        self.session = Some(user_id.to_string());
        Ok(())
    }

    /// Full reconciliation: merge every cached month with every remote
    /// month, store the result on both sides, then adopt it. Remote
    /// failures become notices; local data stays usable throughout.
    pub async fn sign_in(&mut self, user_id: &str) -> Result<SyncReport, PlannerError> {
        self.resume_session(user_id)?;
        let user_id = user_id.trim().to_string();
        let Some((remote, _)) = self.remote_session() else {
            self.events
                .notice(Notice::info("No remote store configured; working offline."));
            return Ok(SyncReport::offline(user_id, self.streak.state().clone()));
        };

        // Background writes must land before the remote side is read back.
        self.settle().await;
        let local = load_dataset(&*self.local);
        let remote_months = match remote.get_all_months(&user_id).await {
            Ok(months) => months,
            Err(err) => {
                self.remote_failed("load your data", &err);
                self.check_streak();
                self.sync_reminders();
                return Ok(SyncReport::offline(user_id, self.streak.state().clone()));
            }
        };

        // An empty remote side is just the degenerate merge: everything
        // local is pushed.
        let (merged, summary) = merge_dataset_with_summary(&local, &remote_months);
        save_dataset(&*self.local, &merged);
        let outgoing: Dataset = summary
            .changed_from_remote
            .iter()
            .filter_map(|key| merged.get(key).map(|month| (key.clone(), month.clone())))
            .collect();
        let mut pushed = Vec::new();
        if !outgoing.is_empty() {
            match remote.batch_set_months(&user_id, &outgoing).await {
                Ok(()) => pushed = outgoing.keys().cloned().collect(),
                Err(err) => self.remote_failed("upload your local changes", &err),
            }
        }

        let current = merged.get(&self.month_key).cloned().unwrap_or_default();
        if *self.month != current {
            self.month = Arc::new(current);
        }
        self.emit_month();

        let streak_source = self.reconcile_streak(&user_id).await;
        let moments = self.reconcile_moments(&user_id).await;

        self.check_streak();
        self.sync_reminders();
        info!(
            %user_id,
            merged = summary.merged,
            local_only = summary.local_only,
            remote_only = summary.remote_only,
            pushed = pushed.len(),
            "signed in"
        );
        Ok(SyncReport {
            user_id,
            remote_ok: true,
            summary,
            pushed,
            moments,
            streak: self.streak.state().clone(),
            streak_source,
        })
    }

    /// Drop the session and every armed reminder. Cached data stays.
    pub fn sign_out(&mut self) {
        if let Some(user_id) = self.session.take() {
            info!(%user_id, "signed out");
        }
        self.reminders.cancel_all_reminders();
        self.ui.clear();
        self.events
            .notice(Notice::info("Signed out. Your data stays on this device."));
    }

    /// Show another month: local copy first, then the remote copy if it
    /// differs.
    pub async fn go_to_month(&mut self, year: i32, month: u32) -> Result<(), PlannerError> {
        let key = month_key(year, month);
        if !is_month_key(&key) {
            return Err(ValidationError::MalformedDateKey(format!("{year}-{month:02}")).into());
        }
        self.open_month_local(&key);
        if let Some((remote, user_id)) = self.remote_session() {
            match remote.get_month(&user_id, &key).await {
                Ok(Some(fetched)) => {
                    self.apply_remote_month(&key, fetched);
                }
                Ok(None) => debug!(month_key = %key, "no remote copy of month"),
                Err(err) => self.remote_failed("load this month", &err),
            }
        }
        Ok(())
    }

    /// Move `delta` months from the one on screen.
    pub async fn navigate(&mut self, delta: i32) -> Result<(), PlannerError> {
        let (year, month) = parse_month_key(&self.month_key)
            .and_then(|(year, month)| shift_month(year, month, delta))
            .ok_or_else(|| ValidationError::MalformedDateKey(self.month_key.clone()))?;
        self.go_to_month(year, month).await
    }

    /// Switch the view to `key` from the local store alone.
    pub fn open_month_local(&mut self, key: &str) {
        self.month_key = key.to_string();
        self.month = Arc::new(self.local.get(key).unwrap_or_default());
        self.emit_month();
        self.sync_reminders();
    }

    /// Adopt a fetched remote month if it is still the month on screen
    /// and differs from what is shown. Returns whether it was adopted.
    pub fn apply_remote_month(&mut self, key: &str, fetched: MonthCollection) -> bool {
        if self.month_key != key {
            debug!(month_key = key, "discarding remote month for stale view");
            return false;
        }
        if *self.month == fetched {
            return false;
        }
        self.local.set(key, &fetched);
        self.month = Arc::new(fetched);
        self.emit_month();
        self.sync_reminders();
        true
    }

    /// Reload the month on screen from the authoritative store, remote
    /// when signed in and reachable, local otherwise. No merge.
    pub async fn refresh(&mut self) -> RefreshSource {
        let key = self.month_key.clone();
        let mut source = RefreshSource::Local;
        let mut fresh = None;
        if let Some((remote, user_id)) = self.remote_session() {
            match remote.get_month(&user_id, &key).await {
                Ok(Some(month)) => {
                    self.local.set(&key, &month);
                    fresh = Some(month);
                    source = RefreshSource::Remote;
                }
                Ok(None) => {}
                Err(err) => self.remote_failed("refresh this month", &err),
            }
        }
        let month = fresh.unwrap_or_else(|| self.local.get(&key).unwrap_or_default());
        self.month = Arc::new(month);
        self.emit_month();
        self.sync_reminders();
        source
    }

    async fn reconcile_streak(&mut self, user_id: &str) -> StreakSource {
        let Some((remote, _)) = self.remote_session() else {
            return StreakSource::Unknown;
        };
        match remote.get_meta(user_id, STREAK_META_NAME).await {
            Ok(Some(value)) => match serde_json::from_value::<StreakState>(value) {
                Ok(state) => {
                    self.streak.replace(state);
                    save_json(&*self.local, STREAK_STORAGE_KEY, self.streak.state());
                    StreakSource::Remote
                }
                Err(err) => {
                    warn!("ignoring unreadable remote streak: {err}");
                    StreakSource::Local
                }
            },
            Ok(None) => {
                let pushed = match serde_json::to_value(self.streak.state()) {
                    Ok(value) => remote.set_meta(user_id, STREAK_META_NAME, &value).await,
                    Err(err) => {
                        warn!("failed to encode streak: {err}");
                        Ok(())
                    }
                };
                if let Err(err) = pushed {
                    warn!("failed to push streak: {err}");
                }
                StreakSource::Local
            }
            Err(err) => {
                warn!("failed to load remote streak: {err}");
                StreakSource::Unknown
            }
        }
    }

    /// Union moments by id, remote winning, and upload the ones the remote
    /// store has never seen.
    async fn reconcile_moments(&mut self, user_id: &str) -> usize {
        let Some((remote, _)) = self.remote_session() else {
            return self.moments.len();
        };
        let remote_moments = match remote.list_moments(user_id).await {
            Ok(moments) => moments,
            Err(err) => {
                self.remote_failed("load your moments", &err);
                return self.moments.len();
            }
        };
        for moment in &self.moments {
            if remote_moments.iter().any(|theirs| theirs.id == moment.id) {
                continue;
            }
            if let Err(err) = remote.add_moment(user_id, moment).await {
                warn!(moment_id = %moment.id, "failed to upload moment: {err}");
            }
        }
        self.moments = merge_moments(&self.moments, &remote_moments);
        self.save_moments();
        self.moments.len()
    }
}
