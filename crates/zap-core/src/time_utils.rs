/// Milliseconds since the Unix epoch, saturating at `u64::MAX`.
///
/// Store backups, journal entries and connection timestamps all use this
/// clock so their values sort together.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
