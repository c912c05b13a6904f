//! Error response decoding.
//!
//! On a rejected frame the gateway sends six bytes and closes the connection:
//! ```text
//! ┌─────────┬────────┬────────────┐
//! │ Command │ Status │ Identifier │
//! │ 1 byte  │ 1 byte │ u32 BE     │
//! └─────────┴────────┴────────────┘
//! ```

use crate::Outcome;

/// Size of an error response in bytes.
pub const ERROR_FRAME_SIZE: usize = 6;

/// Command byte the gateway uses for error responses.
pub const ERROR_COMMAND: u8 = 8;

/// Errors raised while decoding gateway responses.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("short read: expected {expected} bytes, got {actual}")]
    Short { expected: usize, actual: usize },
}

/// Decoded error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFrame {
    pub command: u8,
    pub status: Outcome,
    /// Global index of the rejected frame.
    pub index: u32,
}

impl ErrorFrame {
    /// Decode an error response from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < ERROR_FRAME_SIZE {
            return Err(DecodeError::Short {
                expected: ERROR_FRAME_SIZE,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            command: bytes[0],
            status: Outcome::from_code(bytes[1]),
            index: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        })
    }

    /// Encode as the gateway would send it.
    pub fn encode(&self) -> [u8; ERROR_FRAME_SIZE] {
        let index = self.index.to_be_bytes();
        [
            self.command,
            self.status.code(),
            index[0],
            index[1],
            index[2],
            index[3],
        ]
    }
}
