//! Notification types.

use chrono::{DateTime, Utc};

use crate::Outcome;

/// Errors raised while building a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("invalid hex device token: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("device token is empty")]
    EmptyToken,
    #[error("device token is {0} bytes, longer than a frame can carry")]
    TokenTooLong(usize),
    #[error("payload is {0} bytes, longer than a frame can carry")]
    PayloadTooLong(usize),
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("notification has no destination tokens")]
    NoTokens,
    #[error("batch of {0} frames exceeds the gateway's identifier range")]
    BatchTooLarge(usize),
}

/// Raw device token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DeviceToken(Vec<u8>);

impl DeviceToken {
    /// Wrap raw token bytes.
    pub fn new(bytes: Vec<u8>) -> Result<Self, NotificationError> {
        if bytes.is_empty() {
            return Err(NotificationError::EmptyToken);
        }
        if bytes.len() > u16::MAX as usize {
            return Err(NotificationError::TokenTooLong(bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// Parse a hex token. Whitespace and `<`/`>` (as printed by devices) are ignored.
    pub fn from_hex(text: &str) -> Result<Self, NotificationError> {
        let cleaned: String = text
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '<' && *c != '>')
            .collect();
        Self::new(hex::decode(cleaned)?)
    }

    /// Get token as hex string.
    pub fn token_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.token_hex())
    }
}

/// The `aps` dictionary of a payload.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Aps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(
        default,
        rename = "content-available",
        skip_serializing_if = "Option::is_none"
    )]
    pub content_available: Option<u8>,
}

/// Serialized notification payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Serialize an `aps` dictionary plus custom top-level keys.
    pub fn new(
        aps: &Aps,
        custom: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, NotificationError> {
        let mut root = custom;
        root.insert("aps".to_string(), serde_json::to_value(aps)?);
        Self::from_bytes(serde_json::to_vec(&root)?)
    }

    /// Payload with only an alert message.
    pub fn alert(message: impl Into<String>) -> Result<Self, NotificationError> {
        let aps = Aps {
            alert: Some(message.into()),
            ..Default::default()
        };
        Self::new(&aps, serde_json::Map::new())
    }

    /// Use pre-serialized bytes as-is.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, NotificationError> {
        if bytes.len() > u16::MAX as usize {
            return Err(NotificationError::PayloadTooLong(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A notification addressed to one or more devices.
#[derive(Debug, Clone)]
pub struct Notification {
    tokens: Vec<DeviceToken>,
    payload: Payload,
    expiry: Option<DateTime<Utc>>,
    outcomes: Vec<Outcome>,
}

impl Notification {
    /// Create a notification. At least one token is required.
    pub fn new(tokens: Vec<DeviceToken>, payload: Payload) -> Result<Self, NotificationError> {
        if tokens.is_empty() {
            return Err(NotificationError::NoTokens);
        }
        Ok(Self {
            tokens,
            payload,
            expiry: None,
            outcomes: Vec::new(),
        })
    }

    /// Ask the gateway to drop the notification if undeliverable past `expiry`.
    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn tokens(&self) -> &[DeviceToken] {
        &self.tokens
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    /// Outcomes of the last push, one per token (empty before the first push).
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// Tokens paired with their outcome from the last push.
    pub fn results(&self) -> impl Iterator<Item = (&DeviceToken, Outcome)> {
        self.tokens.iter().zip(self.outcomes.iter().copied())
    }

    /// Check if every token was delivered.
    pub fn is_success(&self) -> bool {
        self.outcomes.len() == self.tokens.len() && self.outcomes.iter().all(|o| o.is_success())
    }

    pub(crate) fn set_outcomes(&mut self, outcomes: Vec<Outcome>) {
        self.outcomes = outcomes;
    }
}
