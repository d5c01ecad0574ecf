//! Session expiry enforcement.
//!
//! Timestamps are whole unix seconds. A session is live while
//! `now < expires_at`; it is dead from `expires_at` onward.

use crate::clock::Clock;
use crate::ScriptwardenError;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Convert unix seconds into a `DateTime`, saturating at the epoch on overflow.
pub fn unix_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Compute the expiry timestamp for a session starting now.
pub fn expires_at<C: Clock + ?Sized>(clock: &C, ttl: Duration) -> i64 {
    let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    clock.now_unix().saturating_add(ttl_secs)
}

/// Check that a session has not expired.
///
/// # Errors
/// * `TokenExpired` - `now >= expires_at`
pub fn check_expiry<C: Clock + ?Sized>(expires_at: i64, clock: &C) -> Result<(), ScriptwardenError> {
    if clock.now_unix() >= expires_at {
        return Err(ScriptwardenError::TokenExpired {
            expired_at: unix_to_datetime(expires_at),
        });
    }
    Ok(())
}

/// Seconds left before `expires_at`, zero once expired.
pub fn remaining_secs<C: Clock + ?Sized>(expires_at: i64, clock: &C) -> u64 {
    u64::try_from(expires_at.saturating_sub(clock.now_unix())).unwrap_or(0)
}
