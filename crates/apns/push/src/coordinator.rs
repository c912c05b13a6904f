//! Delivery coordinator.
//!
//! The gateway never acknowledges a frame. It reports only the first frame it
//! rejects on a connection and then hangs up, so everything written after that
//! frame has to be sent again on a fresh connection.

use std::time::Duration;

use apns_core::{
    DecodeError, ERROR_COMMAND, ERROR_FRAME_SIZE, Endpoint, ErrorFrame, Frame, Notification,
    Outcome,
};
use color_eyre::eyre::WrapErr as _;

use crate::{Connection, ConnectionProvider};

/// How long to wait for an error response after the last frame of a batch.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Pushes batches of notifications through one gateway endpoint.
///
/// Connections are opened on demand: the first write of a batch opens one, and
/// after a failure the next write opens a replacement. An empty batch opens no
/// connection, and a rejection of the final frame is not followed by a reopen.
pub struct PushCoordinator<P> {
    provider: P,
    endpoint: Endpoint,
    grace_period: Duration,
}

impl<P> PushCoordinator<P>
where
    P: ConnectionProvider,
{
    /// Create a coordinator for `endpoint`.
    pub fn new(provider: P, endpoint: Endpoint) -> Self {
        Self {
            provider,
            endpoint,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Override the wait for a trailing error after the last frame.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Push every notification and record one outcome per token on it.
    ///
    /// Gateway rejections and connection faults end up as outcomes, never as
    /// errors. An error here means the batch could not be framed or outcomes
    /// could not be matched to tokens.
    pub async fn push(&self, notifications: &mut [Notification]) -> color_eyre::eyre::Result<()> {
        let frames = apns_core::frames(notifications).wrap_err("failed to frame batch")?;
        tracing::debug!(
            notifications = notifications.len(),
            frames = frames.len(),
            endpoint = %self.endpoint,
            "pushing batch"
        );

        let outcomes = self.deliver(&frames).await;

        apns_core::assign_outcomes(notifications, &outcomes)
            .wrap_err("failed to assign outcomes to notifications")
    }

    /// Deliver `frames` in order, returning one outcome per frame.
    async fn deliver(&self, frames: &[Frame]) -> Vec<Outcome> {
        let mut delivery: Delivery<P::Connection> = Delivery::new(frames.len());

        while delivery.cursor < frames.len() {
            let index = delivery.cursor;
            let last = index + 1 == frames.len();

            if let Err(e) = delivery.write(&self.provider, self.endpoint, &frames[index]).await {
                tracing::warn!(index, error = %e, "write failed, reconnecting");
                delivery.fail_current().await;
                continue;
            }

            match delivery.observe(last, self.grace_period).await {
                Observation::Quiet => {
                    delivery.outcomes.push(Outcome::Success);
                    delivery.cursor += 1;
                }
                Observation::Rejected(error) if error.index as usize <= index => {
                    if error.command != ERROR_COMMAND {
                        tracing::warn!(command = error.command, "unexpected error response command");
                    }
                    tracing::info!(
                        index = error.index,
                        notification = frames[error.index as usize].notification,
                        status = %error.status,
                        resend = index - error.index as usize,
                        "gateway rejected frame"
                    );
                    delivery.rewind(error).await;
                }
                Observation::Rejected(error) => {
                    tracing::warn!(
                        index,
                        reported = error.index,
                        "gateway reported a frame that was never written"
                    );
                    delivery.fail_current().await;
                }
                Observation::Closed if index == 0 => {
                    tracing::warn!(
                        "gateway closed the connection on the first frame, check the certificate and endpoint"
                    );
                    delivery.fail_current().await;
                }
                Observation::Closed => {
                    tracing::warn!(index, "gateway closed the connection without an error response");
                    delivery.fail_current().await;
                }
                Observation::Garbled(e) => {
                    tracing::warn!(index, error = %e, "malformed error response");
                    delivery.fail_current().await;
                }
                Observation::Failed(e) => {
                    tracing::warn!(index, error = %e, "failed to read from gateway, reconnecting");
                    delivery.fail_current().await;
                }
            }
        }

        delivery.disconnect().await;
        delivery.outcomes
    }
}

/// What the gateway said after a frame was written.
enum Observation {
    /// Nothing to read.
    Quiet,
    /// An error response.
    Rejected(ErrorFrame),
    /// The stream ended without any bytes.
    Closed,
    /// Fewer bytes than an error response.
    Garbled(DecodeError),
    Failed(std::io::Error),
}

/// State of one delivery: next frame to write, outcomes so far, and the live
/// connection.
///
/// `outcomes.len() == cursor` holds between loop iterations.
struct Delivery<C> {
    cursor: usize,
    outcomes: Vec<Outcome>,
    connection: Option<C>,
}

impl<C> Delivery<C>
where
    C: Connection,
{
    fn new(frames: usize) -> Self {
        Self {
            cursor: 0,
            outcomes: Vec::with_capacity(frames),
            connection: None,
        }
    }

    /// Write a frame, opening a connection first if there is none.
    async fn write<P>(
        &mut self,
        provider: &P,
        endpoint: Endpoint,
        frame: &Frame,
    ) -> std::io::Result<()>
    where
        P: ConnectionProvider<Connection = C>,
    {
        if self.connection.is_none() {
            match provider.open(endpoint).await {
                Ok(connection) => {
                    tracing::debug!(%endpoint, "connected to gateway");
                    self.connection = Some(connection);
                }
                Err(e) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::NotConnected,
                        format!("{:#}", e),
                    ));
                }
            }
        }

        match self.connection.as_mut() {
            Some(connection) => connection.write(&frame.bytes).await,
            None => Err(std::io::ErrorKind::NotConnected.into()),
        }
    }

    /// Check for an error response: promptly, or for the last frame after a
    /// flush and a bounded wait.
    async fn observe(&mut self, last: bool, grace_period: Duration) -> Observation {
        let Some(connection) = self.connection.as_mut() else {
            return Observation::Failed(std::io::ErrorKind::NotConnected.into());
        };

        let timeout = if last {
            if let Err(e) = connection.flush().await {
                return Observation::Failed(e);
            }
            grace_period
        } else {
            Duration::ZERO
        };

        match connection.readable(timeout).await {
            Ok(false) => return Observation::Quiet,
            Ok(true) => {}
            Err(e) => return Observation::Failed(e),
        }

        let mut buf = [0u8; ERROR_FRAME_SIZE];
        match connection.read_exact(&mut buf).await {
            Ok(0) => Observation::Closed,
            Ok(n) => match ErrorFrame::decode(&buf[..n]) {
                Ok(error) => Observation::Rejected(error),
                Err(e) => Observation::Garbled(e),
            },
            Err(e) => Observation::Failed(e),
        }
    }

    /// Mark the current frame unknown, drop the connection, and move on.
    async fn fail_current(&mut self) {
        self.outcomes.push(Outcome::Unknown);
        self.cursor += 1;
        self.disconnect().await;
    }

    /// Record a rejection and resume right after the rejected frame.
    ///
    /// Outcomes recorded for the rejected frame and everything after it are
    /// discarded; those frames are in an unknown state and get resent.
    async fn rewind(&mut self, error: ErrorFrame) {
        let failing = error.index as usize;
        self.outcomes.truncate(failing);
        self.outcomes.push(error.status);
        self.cursor = failing + 1;
        self.disconnect().await;
    }

    /// Close the live connection, if any. The next write reconnects.
    async fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use apns_core::{DeviceToken, Payload};

    use super::*;

    const GRACE: Duration = Duration::from_millis(250);

    /// Scripted gateway shared by every connection it hands out.
    #[derive(Default)]
    struct Gateway {
        /// Frames to reject, by global index.
        rejects: HashMap<u32, Outcome>,
        /// Raw bytes to answer with after a given frame.
        replies: HashMap<u32, Vec<u8>>,
        /// Frames whose write fails.
        broken_writes: HashSet<u32>,
        /// Frames written after a rejection before the error shows up on a
        /// prompt check.
        lag: usize,
        /// Open attempts to refuse before accepting.
        refuse_opens: usize,
        opens: usize,
        refused: usize,
        closes: usize,
        written: Vec<u32>,
        waits: Vec<Duration>,
    }

    struct ScriptedConnection {
        gateway: Arc<Mutex<Gateway>>,
        reply: Option<Vec<u8>>,
        countdown: usize,
        closed: bool,
    }

    impl Connection for ScriptedConnection {
        async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            let index = u32::from_be_bytes(bytes[1..5].try_into().unwrap());
            let mut gateway = self.gateway.lock().unwrap();

            if gateway.broken_writes.remove(&index) {
                return Err(std::io::ErrorKind::BrokenPipe.into());
            }
            gateway.written.push(index);

            // After a rejection the gateway ignores the rest of the stream.
            if self.reply.is_some() {
                self.countdown = self.countdown.saturating_sub(1);
                return Ok(());
            }

            if let Some(status) = gateway.rejects.remove(&index) {
                let error = ErrorFrame {
                    command: ERROR_COMMAND,
                    status,
                    index,
                };
                self.reply = Some(error.encode().to_vec());
                self.countdown = gateway.lag;
            } else if let Some(bytes) = gateway.replies.remove(&index) {
                self.reply = Some(bytes);
                self.countdown = 0;
            }

            Ok(())
        }

        async fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }

        async fn readable(&mut self, timeout: Duration) -> std::io::Result<bool> {
            if !timeout.is_zero() {
                self.gateway.lock().unwrap().waits.push(timeout);
            }
            Ok(self.reply.is_some() && (self.countdown == 0 || !timeout.is_zero()))
        }

        async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let reply = self.reply.take().unwrap_or_default();
            let n = reply.len().min(buf.len());
            buf[..n].copy_from_slice(&reply[..n]);
            Ok(n)
        }

        async fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.gateway.lock().unwrap().closes += 1;
            }
        }
    }

    struct ScriptedProvider {
        gateway: Arc<Mutex<Gateway>>,
    }

    impl ConnectionProvider for ScriptedProvider {
        type Connection = ScriptedConnection;

        async fn open(&self, _endpoint: Endpoint) -> color_eyre::eyre::Result<ScriptedConnection> {
            let mut gateway = self.gateway.lock().unwrap();
            if gateway.refuse_opens > 0 {
                gateway.refuse_opens -= 1;
                gateway.refused += 1;
                color_eyre::eyre::bail!("connection refused");
            }
            gateway.opens += 1;

            Ok(ScriptedConnection {
                gateway: self.gateway.clone(),
                reply: None,
                countdown: 0,
                closed: false,
            })
        }
    }

    fn batch(counts: &[usize]) -> Vec<Notification> {
        let payload = Payload::alert("hello").unwrap();
        counts
            .iter()
            .enumerate()
            .map(|(n, &count)| {
                let tokens = (0..count)
                    .map(|t| DeviceToken::new(vec![n as u8, t as u8, 0xab]).unwrap())
                    .collect();
                Notification::new(tokens, payload.clone()).unwrap()
            })
            .collect()
    }

    /// Push a batch through a scripted gateway. Every connection that was
    /// opened must also have been closed.
    async fn run(gateway: Gateway, counts: &[usize]) -> (Vec<Notification>, Gateway) {
        let gateway = Arc::new(Mutex::new(gateway));
        let coordinator = PushCoordinator::new(
            ScriptedProvider {
                gateway: gateway.clone(),
            },
            Endpoint::Sandbox,
        )
        .with_grace_period(GRACE);

        let mut notifications = batch(counts);
        coordinator.push(&mut notifications).await.unwrap();

        let gateway = std::mem::take(&mut *gateway.lock().unwrap());
        assert_eq!(gateway.opens, gateway.closes, "leaked a connection");

        for (notification, &count) in notifications.iter().zip(counts) {
            assert_eq!(notification.outcomes().len(), count);
        }
        (notifications, gateway)
    }

    fn flat(notifications: &[Notification]) -> Vec<Outcome> {
        notifications
            .iter()
            .flat_map(|n| n.outcomes().iter().copied())
            .collect()
    }

    fn with(errors: &[(usize, Outcome)]) -> Vec<Outcome> {
        let mut outcomes = vec![Outcome::Success; 10];
        for &(index, outcome) in errors {
            outcomes[index] = outcome;
        }
        outcomes
    }

    fn rejecting(rejects: &[(u32, Outcome)]) -> Gateway {
        Gateway {
            rejects: rejects.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_clean_batch() {
        let (notifications, gateway) = run(Gateway::default(), &[1; 10]).await;

        assert_eq!(flat(&notifications), with(&[]));
        assert!(notifications.iter().all(|n| n.is_success()));
        assert_eq!(gateway.opens, 1);
        assert_eq!(gateway.written, (0..10).collect::<Vec<_>>());
        // Only the last frame waits for a trailing error.
        assert_eq!(gateway.waits, vec![GRACE]);
    }

    #[tokio::test]
    async fn test_single_error_mid_batch() {
        let gateway = rejecting(&[(2, Outcome::ProcessingError)]);
        let (notifications, gateway) = run(gateway, &[1; 10]).await;

        assert_eq!(flat(&notifications), with(&[(2, Outcome::ProcessingError)]));
        assert_eq!(gateway.opens, 2);
        assert_eq!(gateway.written, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_late_error_resends_frames_after_the_rejected_one() {
        let mut gateway = rejecting(&[(2, Outcome::ProcessingError)]);
        gateway.lag = 2;
        let (notifications, gateway) = run(gateway, &[1; 10]).await;

        assert_eq!(flat(&notifications), with(&[(2, Outcome::ProcessingError)]));
        assert_eq!(gateway.opens, 2);
        assert_eq!(gateway.written, vec![0, 1, 2, 3, 4, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_two_errors() {
        let gateway = rejecting(&[
            (2, Outcome::ProcessingError),
            (5, Outcome::MissingDeviceToken),
        ]);
        let (notifications, gateway) = run(gateway, &[1; 10]).await;

        assert_eq!(
            flat(&notifications),
            with(&[
                (2, Outcome::ProcessingError),
                (5, Outcome::MissingDeviceToken)
            ])
        );
        assert_eq!(gateway.opens, 3);
    }

    #[tokio::test]
    async fn test_first_frame_rejected() {
        let gateway = rejecting(&[(0, Outcome::ProcessingError)]);
        let (notifications, gateway) = run(gateway, &[1; 10]).await;

        assert_eq!(flat(&notifications), with(&[(0, Outcome::ProcessingError)]));
        assert_eq!(gateway.opens, 2);
    }

    #[tokio::test]
    async fn test_last_frame_rejected_during_grace_period() {
        // A lag this large hides the error from every prompt check.
        let mut gateway = rejecting(&[(9, Outcome::ProcessingError)]);
        gateway.lag = 100;
        let (notifications, gateway) = run(gateway, &[1; 10]).await;

        assert_eq!(flat(&notifications), with(&[(9, Outcome::ProcessingError)]));
        assert_eq!(gateway.waits, vec![GRACE]);
        // Nothing is left to send, so no reconnect.
        assert_eq!(gateway.opens, 1);
    }

    #[tokio::test]
    async fn test_late_error_detected_on_last_frame_rewinds() {
        let mut gateway = rejecting(&[(6, Outcome::InvalidToken)]);
        gateway.lag = 100;
        let (notifications, gateway) = run(gateway, &[1; 10]).await;

        assert_eq!(flat(&notifications), with(&[(6, Outcome::InvalidToken)]));
        assert_eq!(gateway.opens, 2);
        assert_eq!(gateway.written, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_rejection_rewinds_past_write_fault() {
        // Frame 4 fails to write and is marked unknown on the first connection.
        // On the second connection the gateway then names frame 3, which was
        // written before the fault: its index wins and frame 4 is sent again.
        let rejected = ErrorFrame {
            command: ERROR_COMMAND,
            status: Outcome::ProcessingError,
            index: 3,
        };
        let gateway = Gateway {
            broken_writes: [4].into_iter().collect(),
            replies: [(6, rejected.encode().to_vec())].into_iter().collect(),
            ..Default::default()
        };
        let (notifications, gateway) = run(gateway, &[1; 10]).await;

        let outcomes = flat(&notifications);
        assert_eq!(outcomes.len(), 10);
        assert_eq!(outcomes, with(&[(3, Outcome::ProcessingError)]));
        assert_eq!(gateway.written, vec![0, 1, 2, 3, 5, 6, 4, 5, 6, 7, 8, 9]);
        assert_eq!(gateway.opens, 3);
    }

    #[tokio::test]
    async fn test_write_fault_marks_frame_unknown() {
        let gateway = Gateway {
            broken_writes: [4].into_iter().collect(),
            ..Default::default()
        };
        let (notifications, gateway) = run(gateway, &[1; 10]).await;

        assert_eq!(flat(&notifications), with(&[(4, Outcome::Unknown)]));
        assert_eq!(gateway.opens, 2);
        assert!(!gateway.written.contains(&4));
    }

    #[tokio::test]
    async fn test_closed_on_first_frame_reconnects() {
        let gateway = Gateway {
            replies: [(0, Vec::new())].into_iter().collect(),
            ..Default::default()
        };
        let (notifications, gateway) = run(gateway, &[1; 10]).await;

        assert_eq!(flat(&notifications), with(&[(0, Outcome::Unknown)]));
        assert_eq!(gateway.opens, 2);
    }

    #[tokio::test]
    async fn test_short_error_response_marks_frame_unknown() {
        let gateway = Gateway {
            replies: [(4, vec![8, 1, 0])].into_iter().collect(),
            ..Default::default()
        };
        let (notifications, gateway) = run(gateway, &[1; 10]).await;

        assert_eq!(flat(&notifications), with(&[(4, Outcome::Unknown)]));
        assert_eq!(gateway.opens, 2);
        assert_eq!(gateway.written, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_error_for_unwritten_frame_marks_current_unknown() {
        let bogus = ErrorFrame {
            command: ERROR_COMMAND,
            status: Outcome::ProcessingError,
            index: 7,
        };
        let gateway = Gateway {
            replies: [(3, bogus.encode().to_vec())].into_iter().collect(),
            ..Default::default()
        };
        let (notifications, _) = run(gateway, &[1; 10]).await;

        assert_eq!(flat(&notifications), with(&[(3, Outcome::Unknown)]));
    }

    #[tokio::test]
    async fn test_refused_connection_marks_frame_unknown() {
        let gateway = Gateway {
            refuse_opens: 1,
            ..Default::default()
        };
        let (notifications, gateway) = run(gateway, &[1; 10]).await;

        assert_eq!(flat(&notifications), with(&[(0, Outcome::Unknown)]));
        assert_eq!(gateway.refused, 1);
        assert_eq!(gateway.opens, 1);
    }

    #[tokio::test]
    async fn test_multi_token_notifications() {
        let gateway = rejecting(&[(4, Outcome::InvalidToken)]);
        let (notifications, _) = run(gateway, &[3, 1, 2]).await;

        assert_eq!(notifications[0].outcomes(), &[Outcome::Success; 3]);
        assert_eq!(notifications[1].outcomes(), &[Outcome::Success]);
        assert_eq!(
            notifications[2].outcomes(),
            &[Outcome::InvalidToken, Outcome::Success]
        );
        assert!(notifications[0].is_success());
        assert!(!notifications[2].is_success());
    }

    #[tokio::test]
    async fn test_empty_batch_opens_nothing() {
        let (notifications, gateway) = run(Gateway::default(), &[]).await;

        assert!(notifications.is_empty());
        assert_eq!(gateway.opens, 0);
    }
}
