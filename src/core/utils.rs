/// Utility functions for common operations across the codebase

/// Get current timestamp in milliseconds since epoch
///
/// Used for log message dates and metadata stamps. A clock set before the
/// epoch yields zero rather than failing.
pub fn current_timestamp_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
