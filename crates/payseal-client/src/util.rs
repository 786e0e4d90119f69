//! Small shared helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds.
///
/// Single source of truth for clock reads across the client; expiries and
/// lockbox status checks all compare against this.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
