//! Notification frame encoding.
//!
//! Each (notification, token) pair becomes one enhanced-format frame:
//! ```text
//! ┌─────────┬────────────┬────────┬───────────┬───────┬─────────────┬─────────┐
//! │ Command │ Identifier │ Expiry │ Token len │ Token │ Payload len │ Payload │
//! │ 1 byte  │ u32 BE     │ u32 BE │ u16 BE    │       │ u16 BE      │         │
//! └─────────┴────────────┴────────┴───────────┴───────┴─────────────┴─────────┘
//! ```
//!
//! The identifier is the frame's global index, which the gateway echoes back in
//! an error frame.

use crate::{DeviceToken, Notification, NotificationError, Payload};

/// Command byte of an enhanced notification frame.
pub const ENHANCED_COMMAND: u8 = 1;

/// One encoded frame, ready to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Global index within the batch.
    pub index: u32,
    /// Position of the owning notification in the batch.
    pub notification: usize,
    /// Encoded bytes.
    pub bytes: Vec<u8>,
}

/// Flatten a batch into frames with dense global indices, in batch order.
///
/// Identifiers are u32 on the wire, so a batch holds at most `u32::MAX + 1`
/// frames.
pub fn frames(notifications: &[Notification]) -> Result<Vec<Frame>, NotificationError> {
    let total = notifications.iter().map(|n| n.tokens().len()).sum();
    let mut frames = Vec::with_capacity(total);

    for (position, notification) in notifications.iter().enumerate() {
        let expiry = notification
            .expiry()
            .map(|t| t.timestamp().clamp(0, u32::MAX as i64) as u32)
            .unwrap_or(0);

        for token in notification.tokens() {
            let index = frame_index(frames.len(), total)?;
            frames.push(Frame {
                index,
                notification: position,
                bytes: encode(index, expiry, token, notification.payload()),
            });
        }
    }

    Ok(frames)
}

fn frame_index(position: usize, total: usize) -> Result<u32, NotificationError> {
    u32::try_from(position).map_err(|_| NotificationError::BatchTooLarge(total))
}

/// Encode a single enhanced frame.
pub fn encode(identifier: u32, expiry: u32, token: &DeviceToken, payload: &Payload) -> Vec<u8> {
    let token = token.as_bytes();
    let payload = payload.as_bytes();

    let mut buf = Vec::with_capacity(13 + token.len() + payload.len());
    buf.push(ENHANCED_COMMAND);
    buf.extend_from_slice(&identifier.to_be_bytes());
    buf.extend_from_slice(&expiry.to_be_bytes());
    // Lengths are bounded to u16 when the token and payload are constructed.
    buf.extend_from_slice(&(token.len() as u16).to_be_bytes());
    buf.extend_from_slice(token);
    buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}
