//! Error types for the chat link.

use std::io;
use std::str::Utf8Error;

use thiserror::Error;

use super::types::Capability;

/// Reasons an inbound frame is rejected by the codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Bytes are not valid UTF-8.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),

    /// No body/sender separator in the frame.
    #[error("frame delimiter missing")]
    MissingDelimiter,

    /// Body is empty after trimming.
    #[error("empty message body")]
    EmptyBody,

    /// Sender label is empty after trimming.
    #[error("empty sender label")]
    EmptySender,
}

/// Fatal failures of a session's receive loop.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Reading from the channel failed.
    #[error("reading incoming data failed: {0}")]
    ReadFailed(#[source] io::Error),

    /// The peer closed the stream.
    #[error("peer closed the connection")]
    Disconnected,
}

/// Errors surfaced by a connection sequence.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The adapter denied a required capability.
    #[error("permission denied: {0}")]
    PermissionDenied(Capability),

    /// The session's receive loop failed.
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

impl ControllerError {
    /// Check if this error came from a missing permission.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

/// Top-level peerchat errors.
#[derive(Debug, Error)]
pub enum PeerchatError {
    /// Controller error.
    #[error("controller error: {0}")]
    Controller(#[from] ControllerError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl From<TransferError> for PeerchatError {
    fn from(err: TransferError) -> Self {
        Self::Controller(ControllerError::Transfer(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_converts_upward() {
        let err: PeerchatError = TransferError::Disconnected.into();
        assert!(matches!(
            err,
            PeerchatError::Controller(ControllerError::Transfer(TransferError::Disconnected))
        ));
    }

    #[test]
    fn test_permission_denied_display() {
        let err = ControllerError::PermissionDenied(Capability::Connect);
        assert!(err.is_permission_denied());
        assert_eq!(err.to_string(), "permission denied: connect");
    }
}
