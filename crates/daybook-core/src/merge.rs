use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{Dataset, DayRecord, Moment, MonthCollection};

/// Merge one day from both replicas.
///
/// Rules (remote wins on conflict, union wins on absence):
/// - A day present on one side only is taken as-is.
/// - Tasks: remote's list replaces local's whenever remote has any tasks.
///   Lists are never unioned.
/// - Note: remote's note whenever remote defines one, even an empty one.
///
/// Legacy day shapes are upgraded when read (see `model::DayRecord`),
/// so both inputs are already normalized here.
pub fn merge_day(local: Option<&DayRecord>, remote: Option<&DayRecord>) -> DayRecord {
    match (local, remote) {
        (None, None) => DayRecord::default(),
        (Some(local), None) => local.clone(),
        (None, Some(remote)) => remote.clone(),
        (Some(local), Some(remote)) => {
            let tasks = if remote.tasks.is_empty() {
                local.tasks.clone()
            } else {
                remote.tasks.clone()
            };
            let note = match &remote.note {
                Some(note) => Some(note.clone()),
                None => local.note.clone(),
            };
            DayRecord { tasks, note }
        }
    }
}

pub fn merge_month(local: &MonthCollection, remote: &MonthCollection) -> MonthCollection {
    let mut merged = MonthCollection::new();
    for key in local.keys().chain(remote.keys()) {
        if merged.contains_key(key) {
            continue;
        }
        merged.insert(key.clone(), merge_day(local.get(key), remote.get(key)));
    }
    merged
}

pub fn merge_dataset(local: &Dataset, remote: &Dataset) -> Dataset {
    merge_dataset_with_summary(local, remote).0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Months only the local replica had; kept unchanged.
    pub local_only: usize,
    /// Months only the remote replica had; adopted unchanged.
    pub remote_only: usize,
    /// Months present on both sides and merged day by day.
    pub merged: usize,
    /// Merged months whose result differs from the remote copy.
    pub changed_from_remote: Vec<String>,
}

pub fn merge_dataset_with_summary(local: &Dataset, remote: &Dataset) -> (Dataset, MergeSummary) {
    let mut merged = Dataset::new();
    let mut summary = MergeSummary::default();

    for (key, local_month) in local {
        match remote.get(key) {
            Some(remote_month) => {
                let month = merge_month(local_month, remote_month);
                summary.merged += 1;
                if &month != remote_month {
                    summary.changed_from_remote.push(key.clone());
                }
                merged.insert(key.clone(), month);
            }
            None => {
                summary.local_only += 1;
                summary.changed_from_remote.push(key.clone());
                merged.insert(key.clone(), local_month.clone());
            }
        }
    }
    for (key, remote_month) in remote {
        if !merged.contains_key(key) {
            summary.remote_only += 1;
            merged.insert(key.clone(), remote_month.clone());
        }
    }

    summary.changed_from_remote.sort();
    (merged, summary)
}

/// Union moments by id; the remote copy wins when both have one.
/// Newest first.
pub fn merge_moments(local: &[Moment], remote: &[Moment]) -> Vec<Moment> {
    let mut by_id: BTreeMap<&str, &Moment> = BTreeMap::new();
    for moment in local {
        by_id.insert(moment.id.as_str(), moment);
    }
    for moment in remote {
        by_id.insert(moment.id.as_str(), moment);
    }
    let mut merged: Vec<Moment> = by_id.into_values().cloned().collect();
    merged.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    merged
}
