//! Error types for channels, connections and the listener.
//!
//! Two families matter to callers. *Close errors* ([`Error::ConnectionClosed`]
//! and [`Error::ChannelClosed`]) report that the other side ended something
//! and must never be reflected back at it. Everything else is a local failure
//! that [`Channel::catch`](crate::Channel::catch) turns into an outgoing
//! error frame.

use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::tungstenite;

/// Reason text sent when a wait loses against its deadline.
pub const TIMED_OUT: &str = "Timed out";

/// Errors produced by the multiplexing layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The physical connection is gone.
    #[error("Connection closed: {}", .reason.as_deref().unwrap_or("no reason given"))]
    ConnectionClosed { reason: Option<String> },

    /// The remote end closed the channel with an error frame.
    #[error("Channel closed with error: {}", .reason.as_deref().unwrap_or("no reason given"))]
    ChannelClosed { reason: Option<String> },

    /// The peer broke the framing rules; the connection can no longer be trusted.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A read or request lost against its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// A data frame arrived where only a terminal close was acceptable.
    #[error("Unexpected message")]
    UnexpectedMessage,

    /// An open frame arrived on a path nobody consumes.
    #[error("No route for {0}")]
    NoRoute(String),

    /// Application-level refusal, sent to the peer verbatim.
    #[error("{0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for [`Error::Rejected`].
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// Whether this error reports a close initiated elsewhere.
    pub fn is_close(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. } | Self::ChannelClosed { .. })
    }

    /// Text placed in the `reason` of an outgoing error frame.
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::ConnectionClosed { reason } | Self::ChannelClosed { reason } => reason.clone(),
            Self::Timeout(_) => Some(TIMED_OUT.to_string()),
            Self::Rejected(reason) => Some(reason.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// How a channel reached its terminal state, as seen by its observers.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// The underlying connection went away first.
    ConnectionClosed(Option<String>),
    /// Either side threw an error on the channel.
    ChannelClosedWithError(Option<String>),
    /// Either side closed the channel with a final payload.
    ChannelClosedNormally(Value),
}

impl CloseReason {
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::ChannelClosedNormally(_))
    }

    /// The close payload for a normal close, the matching close error otherwise.
    pub fn into_result(self) -> Result<Value, Error> {
        match self {
            Self::ChannelClosedNormally(data) => Ok(data),
            Self::ChannelClosedWithError(reason) => Err(Error::ChannelClosed { reason }),
            Self::ConnectionClosed(reason) => Err(Error::ConnectionClosed { reason }),
        }
    }
}
