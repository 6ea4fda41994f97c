/// Clock helpers.
///
/// Message and conversation timestamps travel as strings. They are rendered
/// as fixed-width UTC RFC 3339 with millisecond precision so that plain
/// lexicographic ordering (SQLite `ORDER BY timestamp`, remote snapshots)
/// matches chronological ordering.
use chrono::{DateTime, TimeZone, Utc};

const SORTABLE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Returns the current time as a sortable timestamp string.
pub fn sortable_now() -> String {
    sortable_from_millis(now_timestamp_millis())
}

/// Renders a Unix millisecond timestamp as a sortable string.
pub fn sortable_from_millis(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => format_sortable(dt),
        None => format_sortable(DateTime::<Utc>::UNIX_EPOCH),
    }
}

fn format_sortable(dt: DateTime<Utc>) -> String {
    dt.format(SORTABLE_FORMAT).to_string()
}
