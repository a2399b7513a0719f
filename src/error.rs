//! Error types for the chat service
//!
//! Defines wire protocol decode errors, application-level errors and
//! message send errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Wire protocol decode errors
///
/// Produced when an inbound byte sequence cannot be interpreted as a frame
/// or as a typed message. Decode failures are never fatal: the caller drops
/// the offending frame and keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame does not begin with the start delimiter
    #[error("missing frame start delimiter")]
    MissingStart,

    /// Frame lacks the payload delimiters or the end delimiter
    #[error("missing payload delimiters")]
    MissingData,

    /// Action type or target id is not a valid integer
    #[error("malformed frame header: {0}")]
    BadHeader(String),

    /// Numeric action type outside the declared enum range
    #[error("unknown action type {0}")]
    UnknownAction(u32),

    /// A payload field failed to parse (e.g. non-numeric id)
    #[error("malformed payload field '{0}'")]
    BadField(String),

    /// Payload did not contain the declared number of fields
    #[error("expected {expected} payload fields, got {got}")]
    FieldCount { expected: usize, got: usize },
}

/// Application-level errors
///
/// Covers fatal transport errors and session lifecycle errors. Per-request
/// business failures are not errors here; they travel as `Failure`
/// responses over the wire.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (connection-scoped, or startup-fatal for bind/listen)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Undecodable inbound data
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Channel send error (internal channel broken)
    #[error("channel send error")]
    ChannelSend,

    /// The session has been stopped or the peer went away
    #[error("session closed")]
    SessionClosed,

    /// A synchronous request is already awaiting its reply
    #[error("a request is already in flight")]
    RequestInFlight,
}

/// Message send errors
///
/// Occurs when attempting to send messages through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("channel closed")]
    ChannelClosed,
}
