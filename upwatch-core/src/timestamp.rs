//! Extracts the wall-clock instant from the leading `[...]` field of a log line.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

const NO_ZONE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Returns the instant encoded between the first `[` and its matching `]`,
/// or `None` if the brackets are missing or no known layout matches.
///
/// Two shapes are accepted: a bare `YYYY-MM-DDTHH:MM:SS.mmm` with no zone,
/// interpreted in the local timezone, and a full RFC 3339 timestamp with an
/// explicit zone (optionally carrying nanosecond precision).
pub fn parse_leading_timestamp(line: &str) -> Option<DateTime<Local>> {
    let start = line.find('[')?;
    let end = line[start + 1..].find(']')? + start + 1;
    let field = &line[start + 1..end];

    if let Ok(parsed) = DateTime::parse_from_rfc3339(field) {
        return Some(parsed.with_timezone(&Local));
    }

    let naive = NaiveDateTime::parse_from_str(field, NO_ZONE_FORMAT).ok()?;
    match Local.from_local_datetime(&naive).single() {
        Some(dt) => Some(dt),
        None => Local.from_local_datetime(&naive).earliest(),
    }
}
