use thiserror::Error;

/// Handshake or transport failure. Fatal to the session; never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("invalid connection settings: {0}")]
    InvalidSettings(String),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("session configuration was not acknowledged in time")]
    HandshakeTimeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("agent rejected session configuration: {0}")]
    Rejected(String),

    #[error("connection closed during handshake")]
    ClosedDuringHandshake,
}

/// A single outbound event could not be delivered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("agent channel closed")]
    Closed,

    #[error("timed out queueing {event_type}")]
    Timeout { event_type: &'static str },
}

/// Malformed inbound audio payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid base64 audio: {0}")]
    Base64(String),

    #[error("pcm payload has odd length {0}")]
    OddLength(usize),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("voice must not be empty")]
    EmptyVoice,

    #[error("tool #{index} has an empty server label")]
    EmptyToolLabel { index: usize },

    #[error("tool {label} has an empty server url")]
    EmptyToolUrl { label: String },

    #[error("tool {label}: operation {operation} is both auto-approved and approval-gated")]
    OverlappingApproval { label: String, operation: String },
}
