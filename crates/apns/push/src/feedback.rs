//! Feedback service: tokens the gateway could no longer deliver to.
//!
//! The service writes tuples and then closes the connection:
//! ```text
//! ┌───────────┬───────────┬───────┐
//! │ Timestamp │ Token len │ Token │
//! │ u32 BE    │ u16 BE    │       │
//! └───────────┴───────────┴───────┘
//! ```

use apns_core::{DecodeError, DeviceToken};
use chrono::{DateTime, Utc};
use color_eyre::eyre::WrapErr as _;

use crate::Connection;

const TUPLE_HEADER_SIZE: usize = 6;

/// A token reported by the feedback service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackEntry {
    /// When the gateway determined the app was gone from the device.
    pub timestamp: DateTime<Utc>,
    pub token: DeviceToken,
}

/// Read feedback tuples until the service closes the connection.
///
/// A truncated trailing tuple is logged and dropped.
pub async fn read_feedback<C>(connection: &mut C) -> color_eyre::eyre::Result<Vec<FeedbackEntry>>
where
    C: Connection,
{
    let mut entries = Vec::new();

    loop {
        let mut header = [0u8; TUPLE_HEADER_SIZE];
        let n = connection
            .read_exact(&mut header)
            .await
            .wrap_err("failed to read feedback tuple")?;
        if n == 0 {
            break;
        }
        if n < TUPLE_HEADER_SIZE {
            let e = DecodeError::Short {
                expected: TUPLE_HEADER_SIZE,
                actual: n,
            };
            tracing::warn!(error = %e, "discarding truncated feedback tuple");
            break;
        }

        let seconds = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let len = u16::from_be_bytes([header[4], header[5]]) as usize;

        let mut token = vec![0u8; len];
        let n = connection
            .read_exact(&mut token)
            .await
            .wrap_err("failed to read feedback token")?;
        if n < len {
            let e = DecodeError::Short {
                expected: len,
                actual: n,
            };
            tracing::warn!(error = %e, "discarding truncated feedback token");
            break;
        }

        let Some(timestamp) = DateTime::from_timestamp(i64::from(seconds), 0) else {
            continue;
        };
        match DeviceToken::new(token) {
            Ok(token) => entries.push(FeedbackEntry { timestamp, token }),
            Err(e) => tracing::warn!(error = %e, "skipping invalid feedback token"),
        }
    }

    tracing::debug!(entries = entries.len(), "read feedback");
    Ok(entries)
}
