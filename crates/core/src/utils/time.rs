use chrono::{DateTime, Utc};

/// Wall-clock milliseconds since the Unix epoch; the venue's nonce and timestamp unit.
pub fn now_timestamp_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Out-of-range values fall back to the current time.
pub fn timestamp_to_datetime(timestamp_ms: u64) -> DateTime<Utc> {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}
