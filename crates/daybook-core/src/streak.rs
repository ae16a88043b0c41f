use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::{date_key, is_today, is_yesterday};

pub const STREAK_STORAGE_KEY: &str = "todo-streak";
pub const STREAK_META_NAME: &str = "streak";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakState {
    #[serde(default)]
    pub streak: u32,
    #[serde(default)]
    /// `None` after a revert; the count is kept and the next completed
    /// day builds on it.
    pub last_streak_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakChange {
    Reset,
    Started,
    Increased,
    Reverted,
}

impl StreakChange {
    pub fn message(&self, state: &StreakState) -> String {
        match self {
            StreakChange::Reset => "Streak reset. Complete today's tasks to start again.".to_string(),
            StreakChange::Started => "Streak started: 1 day.".to_string(),
            StreakChange::Increased => format!("Streak increased: {} days.", state.streak),
            StreakChange::Reverted => format!("Streak reverted to {}.", state.streak),
        }
    }
}

/// Day-completion streak. Pure state machine: callers persist the state
/// and publish the returned change.
#[derive(Debug, Clone, Default)]
pub struct StreakTracker {
    state: StreakState,
}

impl StreakTracker {
    pub fn new(state: StreakState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &StreakState {
        &self.state
    }

    pub fn replace(&mut self, state: StreakState) {
        self.state = state;
    }

    /// Reset when a last counted day is set and is neither today nor
    /// yesterday. Runs at load and again once the host is interactive.
    pub fn check_missed_day(&mut self, today: NaiveDate) -> Option<StreakChange> {
        let stale = self
            .state
            .last_streak_date
            .as_deref()
            .is_some_and(|last| !is_today(last, today) && !is_yesterday(last, today));
        if !stale {
            return None;
        }
        self.state = StreakState::default();
        Some(StreakChange::Reset)
    }

    /// Apply a mutation of today's tasks. `was_complete` must be computed
    /// before the mutation was applied, `is_complete` after.
    pub fn record_today(
        &mut self,
        today: NaiveDate,
        was_complete: bool,
        is_complete: bool,
    ) -> Option<StreakChange> {
        let today_key = date_key(today);
        let counted_today = self.state.last_streak_date.as_deref() == Some(today_key.as_str());

        if is_complete {
            if counted_today {
                return None;
            }
            let continues = self
                .state
                .last_streak_date
                .as_deref()
                .map_or(true, |last| is_yesterday(last, today));
            let base = if continues { self.state.streak } else { 0 };
            self.state = StreakState {
                streak: base + 1,
                last_streak_date: Some(today_key),
            };
            return Some(if base == 0 {
                StreakChange::Started
            } else {
                StreakChange::Increased
            });
        }

        if was_complete && counted_today {
            self.state = StreakState {
                streak: self.state.streak.saturating_sub(1),
                last_streak_date: None,
            };
            return Some(StreakChange::Reverted);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    fn state(streak: u32, last: Option<&str>) -> StreakState {
        StreakState {
            streak,
            last_streak_date: last.map(str::to_string),
        }
    }

    #[test]
    fn complete_uncomplete_recomplete_never_double_counts() {
        let today = day(2026, 5, 10);
        let mut tracker = StreakTracker::default();

        assert_eq!(tracker.record_today(today, false, true), Some(StreakChange::Started));
        assert_eq!(tracker.state().streak, 1);
        assert_eq!(tracker.state().last_streak_date.as_deref(), Some("2026-05-10"));

        // Re-completion while counted is a no-op.
        assert_eq!(tracker.record_today(today, true, true), None);
        assert_eq!(tracker.state().streak, 1);

        assert_eq!(tracker.record_today(today, true, false), Some(StreakChange::Reverted));
        assert_eq!(tracker.state().streak, 0);
        assert_eq!(tracker.state().last_streak_date, None);

        // A second uncompletion cannot decrement again.
        assert_eq!(tracker.record_today(today, false, false), None);
        assert_eq!(tracker.state().streak, 0);

        assert_eq!(tracker.record_today(today, false, true), Some(StreakChange::Started));
        assert_eq!(tracker.state().streak, 1);
    }

    #[test]
    fn continues_from_yesterday() {
        let today = day(2026, 5, 10);
        let mut tracker = StreakTracker::new(state(4, Some("2026-05-09")));
        assert_eq!(tracker.record_today(today, false, true), Some(StreakChange::Increased));
        assert_eq!(tracker.state(), &state(5, Some("2026-05-10")));
    }

    #[test]
    fn revert_then_recomplete_restores_the_chain() {
        let today = day(2026, 5, 10);
        let mut tracker = StreakTracker::new(state(5, Some("2026-05-10")));
        tracker.record_today(today, true, false);
        assert_eq!(tracker.state().streak, 4);
        // Same-day reload keeps the reverted count.
        assert_eq!(tracker.check_missed_day(today), None);
        assert_eq!(tracker.record_today(today, false, true), Some(StreakChange::Increased));
        assert_eq!(tracker.state().streak, 5);
    }

    #[test]
    fn an_unset_last_day_is_never_stale() {
        let mut tracker = StreakTracker::new(state(4, None));
        assert_eq!(tracker.check_missed_day(day(2026, 5, 11)), None);
        assert_eq!(tracker.check_missed_day(day(2026, 9, 30)), None);
        assert_eq!(tracker.state(), &state(4, None));
    }

    #[test]
    fn an_unset_last_day_increments_the_kept_count() {
        let mut tracker = StreakTracker::new(state(4, None));
        assert_eq!(
            tracker.record_today(day(2026, 5, 12), false, true),
            Some(StreakChange::Increased)
        );
        assert_eq!(tracker.state(), &state(5, Some("2026-05-12")));
    }

    #[test]
    fn missed_days_reset_and_fresh_days_do_not() {
        let today = day(2026, 5, 10);
        let mut stale = StreakTracker::new(state(7, Some("2026-05-07")));
        assert_eq!(stale.check_missed_day(today), Some(StreakChange::Reset));
        assert_eq!(stale.state(), &state(0, None));

        let mut fresh = StreakTracker::new(state(7, Some("2026-05-09")));
        assert_eq!(fresh.check_missed_day(today), None);

        let mut empty = StreakTracker::default();
        assert_eq!(empty.check_missed_day(today), None);
    }

    #[test]
    fn completion_after_a_gap_starts_over() {
        let mut tracker = StreakTracker::new(state(9, Some("2026-05-01")));
        assert_eq!(
            tracker.record_today(day(2026, 5, 10), false, true),
            Some(StreakChange::Started)
        );
        assert_eq!(tracker.state().streak, 1);
    }

    #[test]
    fn state_serializes_with_camel_case_keys() {
        let value = serde_json::to_value(state(2, Some("2026-05-10"))).expect("json");
        assert_eq!(value["lastStreakDate"], "2026-05-10");
        assert_eq!(value.as_object().map(|map| map.len()), Some(2));
    }
}
