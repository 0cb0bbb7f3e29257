//! Fixed-offset calendar day arithmetic.
//!
//! All day boundaries are computed in a constant UTC+7 offset regardless of
//! the host timezone, so rollover happens at the same wall-clock moment on
//! every deployment.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

const OFFSET_SECONDS: i32 = 7 * 3600;

fn fixed_offset() -> FixedOffset {
    FixedOffset::east_opt(OFFSET_SECONDS).expect("UTC+7 is a valid offset")
}

/// Calendar day of `now` in the fixed UTC+7 offset
pub fn current_day(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&fixed_offset()).date_naive()
}

/// Today in the fixed offset
pub fn today() -> NaiveDate {
    current_day(Utc::now())
}

/// Day formatted as YYYY-MM-DD, the cache key segment
pub fn day_string(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Parse a YYYY-MM-DD day string
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// The day before `day`
pub fn previous_day(day: NaiveDate) -> NaiveDate {
    day - Duration::days(1)
}

/// Start of the next fixed-offset day, i.e. the next rollover instant
pub fn next_midnight(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    let offset = fixed_offset();
    let next = current_day(now) + Duration::days(1);
    let midnight = next
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time of day");
    offset
        .from_local_datetime(&midnight)
        .single()
        .expect("fixed offsets have no DST gaps")
}
