use std::sync::OnceLock;

use chrono::{Datelike, Months, NaiveDate, NaiveTime};
use regex::Regex;

pub const MONTH_KEY_PREFIX: &str = "todo-calendar-";

const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn parse_date_key(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    // chrono accepts unpadded fields; storage keys must be exactly YYYY-MM-DD.
    if trimmed.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, DATE_KEY_FORMAT).ok()
}

pub fn month_key(year: i32, month: u32) -> String {
    format!("{MONTH_KEY_PREFIX}{year:04}-{month:02}")
}

pub fn month_key_for_date(date: NaiveDate) -> String {
    month_key(date.year(), date.month())
}

pub fn month_key_for_date_key(value: &str) -> Option<String> {
    parse_date_key(value).map(month_key_for_date)
}

pub fn parse_month_key(value: &str) -> Option<(i32, u32)> {
    let rest = value.trim().strip_prefix(MONTH_KEY_PREFIX)?;
    let (year, month) = rest.split_once('-')?;
    if year.len() != 4 || month.len() != 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month))
}

pub fn is_month_key(value: &str) -> bool {
    parse_month_key(value).is_some()
}

/// True when `day_key` falls inside the month named by `month_key`.
pub fn date_key_in_month(day_key: &str, month_key: &str) -> bool {
    month_key_for_date_key(day_key).as_deref() == Some(month_key)
}

pub fn is_today(key: &str, today: NaiveDate) -> bool {
    parse_date_key(key) == Some(today)
}

pub fn is_yesterday(key: &str, today: NaiveDate) -> bool {
    match (parse_date_key(key), today.pred_opt()) {
        (Some(date), Some(yesterday)) => date == yesterday,
        _ => false,
    }
}

/// First and last calendar day of a month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
    Some((first, last))
}

pub fn shift_month(year: i32, month: u32, delta: i32) -> Option<(i32, u32)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let shifted = if delta >= 0 {
        first.checked_add_months(Months::new(delta.unsigned_abs()))?
    } else {
        first.checked_sub_months(Months::new(delta.unsigned_abs()))?
    };
    Some((shifted.year(), shifted.month()))
}

fn reminder_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([01]?\d|2[0-3]):([0-5]\d)$").expect("regex"))
}

fn display_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(0?[1-9]|1[0-2]):([0-5]\d)\s*(AM|PM)$").expect("regex")
    })
}

/// Parse a 24h `HH:MM` reminder time.
pub fn parse_reminder_time(value: &str) -> Option<NaiveTime> {
    let caps = reminder_time_re().captures(value.trim())?;
    let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(2)?.as_str().parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Parse a 12h `hh:mm AM/PM` display time.
pub fn parse_display_time(value: &str) -> Option<NaiveTime> {
    let caps = display_time_re().captures(value.trim())?;
    let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(2)?.as_str().parse().ok()?;
    let pm = caps.get(3)?.as_str().eq_ignore_ascii_case("pm");
    let hour = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

pub fn format_display_time(time: NaiveTime) -> String {
    time.format("%I:%M %p").to_string()
}

pub fn format_reminder_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}
