use std::time::SystemTime;

/// Read the time since the Unix epoch in nanoseconds. Will return 0 if the system-reported time is
/// somehow before the Unix epoch.
#[must_use]
pub fn current_time_nanos() -> u128 {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_nanos()
}
