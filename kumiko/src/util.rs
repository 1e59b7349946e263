use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as milliseconds since the epoch.
///
/// Cache expiries and lock TTLs are stored in this form so that a
/// distributed driver can compare them against its own clock.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}
