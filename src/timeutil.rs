// src/timeutil.rs

//! Shared timestamp handling.
//!
//! All user-visible timestamps use one fixed format; an unset time is the
//! literal `"-"`. The module also owns the process-wide clock, which tests
//! can pin to a fixed instant.

use std::sync::RwLock;

use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeZone, Timelike};

/// Format used for `StartedAt` / `FinishedAt` fields.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sentinel for an unset timestamp.
pub const TIME_EMPTY: &str = "-";

/// Render a timestamp in the fixed format, or `"-"` when unset.
pub fn format_time(t: Option<DateTime<Local>>) -> String {
    match t {
        Some(t) => t.format(TIME_FORMAT).to_string(),
        None => TIME_EMPTY.to_string(),
    }
}

/// Parse a timestamp in the fixed format. The `"-"` sentinel parses to `None`.
pub fn parse_time(val: &str) -> Result<Option<DateTime<Local>>, chrono::ParseError> {
    if val == TIME_EMPTY {
        return Ok(None);
    }
    let naive = NaiveDateTime::parse_from_str(val, TIME_FORMAT)?;
    Ok(match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t),
        // DST fold: take the earlier instant.
        LocalResult::Ambiguous(t, _) => Some(t),
        LocalResult::None => None,
    })
}

/// Truncate a timestamp to the start of its minute.
pub fn truncate_to_minute(t: DateTime<Local>) -> DateTime<Local> {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

static FIXED_TIME: RwLock<Option<DateTime<Local>>> = RwLock::new(None);

/// Current time, unless a fixed time has been installed via
/// [`set_fixed_time`]. All core code reads the clock through this function.
pub fn now() -> DateTime<Local> {
    if let Ok(fixed) = FIXED_TIME.read() {
        if let Some(t) = *fixed {
            return t;
        }
    }
    Local::now()
}

/// Pin the process clock to a fixed instant (`Some`) or restore the system
/// clock (`None`). Intended for tests.
pub fn set_fixed_time(t: Option<DateTime<Local>>) {
    if let Ok(mut fixed) = FIXED_TIME.write() {
        *fixed = t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn format_and_parse_round_trip() {
        let t = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let s = format_time(Some(t));
        assert_eq!(s, "2024-01-02 03:04:05");
        assert_eq!(parse_time(&s).unwrap(), Some(t));
    }

    #[test]
    fn unset_time_is_dash() {
        assert_eq!(format_time(None), "-");
        assert_eq!(parse_time("-").unwrap(), None);
    }

    #[test]
    fn truncation_drops_seconds() {
        let t = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 59).unwrap();
        let truncated = truncate_to_minute(t);
        assert_eq!(truncated, Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 0).unwrap());
    }

    #[test]
    fn fixed_time_overrides_clock() {
        let t = Local.with_ymd_and_hms(2020, 5, 6, 7, 8, 9).unwrap();
        set_fixed_time(Some(t));
        assert_eq!(now(), t);
        assert_eq!(now() + Duration::minutes(1), t + Duration::minutes(1));
        set_fixed_time(None);
        assert_ne!(now(), t);
    }
}
