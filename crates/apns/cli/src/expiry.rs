//! Notification expiry from a time-to-live.

use chrono::{DateTime, TimeDelta, Utc};
use color_eyre::eyre::eyre;

/// The instant `ttl_secs` after `now`.
pub fn expiry_after(
    now: DateTime<Utc>,
    ttl_secs: u32,
) -> color_eyre::eyre::Result<DateTime<Utc>> {
    TimeDelta::try_seconds(i64::from(ttl_secs))
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| eyre!("ttl of {} seconds is out of range", ttl_secs))
}
