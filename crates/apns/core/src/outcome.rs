//! Per-frame delivery outcomes.

/// Final delivery status of a single frame.
///
/// Codes other than [`Outcome::Unknown`] are defined by the gateway. `Unknown`
/// shares the gateway's "none" code but is only ever assigned locally, when a
/// connection-level fault hides the real result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Outcome {
    /// No error frame was reported for this frame.
    Success,
    ProcessingError,
    MissingDeviceToken,
    MissingTopic,
    MissingPayload,
    InvalidTokenSize,
    InvalidTopicSize,
    InvalidPayloadSize,
    InvalidToken,
    /// The gateway is shutting down the connection.
    Shutdown,
    /// The real outcome could not be determined.
    Unknown,
    /// A status code this client does not know about.
    Unrecognized(u8),
}

impl Outcome {
    /// Map a gateway status code to an outcome.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Outcome::Success,
            1 => Outcome::ProcessingError,
            2 => Outcome::MissingDeviceToken,
            3 => Outcome::MissingTopic,
            4 => Outcome::MissingPayload,
            5 => Outcome::InvalidTokenSize,
            6 => Outcome::InvalidTopicSize,
            7 => Outcome::InvalidPayloadSize,
            8 => Outcome::InvalidToken,
            10 => Outcome::Shutdown,
            255 => Outcome::Unknown,
            other => Outcome::Unrecognized(other),
        }
    }

    /// The wire status code for this outcome.
    pub fn code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::ProcessingError => 1,
            Outcome::MissingDeviceToken => 2,
            Outcome::MissingTopic => 3,
            Outcome::MissingPayload => 4,
            Outcome::InvalidTokenSize => 5,
            Outcome::InvalidTopicSize => 6,
            Outcome::InvalidPayloadSize => 7,
            Outcome::InvalidToken => 8,
            Outcome::Shutdown => 10,
            Outcome::Unknown => 255,
            Outcome::Unrecognized(code) => code,
        }
    }

    /// Check if delivery was accepted.
    pub fn is_success(self) -> bool {
        self == Outcome::Success
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Outcome::Success => "success",
            Outcome::ProcessingError => "processing error",
            Outcome::MissingDeviceToken => "missing device token",
            Outcome::MissingTopic => "missing topic",
            Outcome::MissingPayload => "missing payload",
            Outcome::InvalidTokenSize => "invalid token size",
            Outcome::InvalidTopicSize => "invalid topic size",
            Outcome::InvalidPayloadSize => "invalid payload size",
            Outcome::InvalidToken => "invalid token",
            Outcome::Shutdown => "shutdown",
            Outcome::Unknown => "unknown",
            Outcome::Unrecognized(code) => return write!(f, "unrecognized status {}", code),
        };
        f.write_str(text)
    }
}
