//! Splitting flat per-frame outcomes back onto notifications.

use crate::{Notification, Outcome};

/// The outcome count does not match the batch's frame count.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("outcome count {outcomes} does not match frame count {frames}")]
pub struct AssembleError {
    pub outcomes: usize,
    pub frames: usize,
}

/// Assign consecutive chunks of `outcomes` to each notification in batch order.
///
/// Notification `k` receives as many outcomes as it has tokens. Nothing is
/// assigned unless the counts match exactly.
pub fn assign_outcomes(
    notifications: &mut [Notification],
    outcomes: &[Outcome],
) -> Result<(), AssembleError> {
    let frames: usize = notifications.iter().map(|n| n.tokens().len()).sum();
    if frames != outcomes.len() {
        return Err(AssembleError {
            outcomes: outcomes.len(),
            frames,
        });
    }

    let mut offset = 0;
    for notification in notifications.iter_mut() {
        let count = notification.tokens().len();
        notification.set_outcomes(outcomes[offset..offset + count].to_vec());
        offset += count;
    }

    Ok(())
}
