use chrono::Utc;

/// Wall-clock milliseconds since the Unix epoch.
///
/// Clamped to zero for clocks set before 1970 so callers can treat the value
/// as an unsigned tick timestamp.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
