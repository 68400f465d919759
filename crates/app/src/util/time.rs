use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::{AppError, Result};
use meter_core::Settings;

pub fn parse_wall_clock(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|err| AppError::InvalidInput(format!("invalid time {value:?}: {err}")))
}

/// Next occurrence of a wall-clock time: today if it is still ahead,
/// otherwise tomorrow. `None` only when the local time does not exist
/// (DST gap on both candidate days).
pub fn next_occurrence<Tz: TimeZone>(now: DateTime<Tz>, at: NaiveTime) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let today = now.date_naive().and_time(at);
    if let Some(candidate) = tz.from_local_datetime(&today).earliest()
        && candidate > now
    {
        return Some(candidate);
    }
    let tomorrow = (now.date_naive() + Duration::days(1)).and_time(at);
    tz.from_local_datetime(&tomorrow).earliest()
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// A reset day beyond the current month's end acts as the month's last day.
pub fn effective_reset_day(now: DateTime<Utc>, reset_day: u32) -> u32 {
    reset_day.min(days_in_month(now.year(), now.month())).max(1)
}

/// The reset fires once the configured period has elapsed and today has
/// reached the reset day. Never due before the first reset anchor exists.
pub fn reset_due(now: DateTime<Utc>, last_reset: Option<DateTime<Utc>>, settings: &Settings) -> bool {
    let Some(last_reset) = last_reset else {
        return false;
    };
    let elapsed = now.signed_duration_since(last_reset);
    if elapsed < Duration::days(settings.reset_period_days as i64) {
        return false;
    }
    now.day() >= effective_reset_day(now, settings.reset_day)
}

/// Which day of the current usage period it is, counting from the most
/// recent occurrence of the reset day.
pub fn period_day(now: DateTime<Utc>, reset_day: u32) -> u32 {
    let (mut year, mut month) = (now.year(), now.month());
    if now.day() < effective_reset_day(now, reset_day) {
        if month == 1 {
            year -= 1;
            month = 12;
        } else {
            month -= 1;
        }
    }
    let day = reset_day.min(days_in_month(year, month)).max(1);
    match Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single() {
        Some(start) => {
            let seconds = now.signed_duration_since(start).num_seconds().max(0);
            (((seconds + 86_399) / 86_400) as u32).max(1)
        }
        None => 1,
    }
}
