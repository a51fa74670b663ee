//! Error types for parch-relay.

use crate::capability::CapabilityError;
use crate::identity::AuthError;
use crate::limits::{EnvelopeError, RateLimitError};
use parch_types::{Frame, TypesError};
use std::path::PathBuf;

/// Main error type for relay startup and background operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Host directory storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A host with this id is already registered.
    #[error("host already registered: {host_id}")]
    DuplicateHost {
        /// The conflicting host id.
        host_id: String,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Failure of a single inbound frame.
///
/// Each variant maps to one class of client-visible error; none of them
/// end the session.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Malformed or unexpected frame.
    #[error("{0}")]
    Protocol(String),

    /// Identity handshake failure, or an action attempted before one.
    #[error("{0}")]
    Authentication(#[from] AuthError),

    /// Capability missing, invalid, expired or under-scoped.
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] CapabilityError),

    /// Host unknown, or its author is offline or unreachable.
    #[error("{0}")]
    HostConnectivity(String),

    /// Chat send over the session's rate limit.
    #[error("{0}")]
    RateLimited(#[from] RateLimitError),

    /// Chat envelope with an invalid shape.
    #[error("invalid envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Session, channel or space missing from an index; logged only.
    #[error("{0}")]
    Resource(String),
}

impl HandlerError {
    /// Shorthand for a protocol error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    /// Shorthand for a host connectivity error.
    pub fn host(reason: impl Into<String>) -> Self {
        Self::HostConnectivity(reason.into())
    }

    /// The frame reported to the client, if any.
    pub fn to_frame(&self) -> Option<Frame> {
        let content = self.to_string();
        match self {
            Self::Authentication(_) => Some(Frame::authentication_error(content)),
            Self::HostConnectivity(_) => Some(Frame::author_error(content)),
            Self::Protocol(_) | Self::Unauthorized(_) | Self::RateLimited(_) | Self::Envelope(_) => {
                Some(Frame::error(content))
            }
            Self::Resource(_) => None,
        }
    }
}

impl From<TypesError> for HandlerError {
    fn from(e: TypesError) -> Self {
        Self::Protocol(e.to_string())
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for frame handlers.
pub type HandlerResult<T = ()> = std::result::Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use parch_types::MessageType;

    #[test]
    fn error_classes_map_to_frame_types() {
        let auth = HandlerError::Authentication(AuthError::ChallengeMismatch);
        assert_eq!(
            auth.to_frame().unwrap().message_type(),
            Some(MessageType::AuthenticationError)
        );

        let unauthorized = HandlerError::Unauthorized(CapabilityError::Expired);
        let frame = unauthorized.to_frame().unwrap();
        assert_eq!(frame.message_type(), Some(MessageType::Error));
        assert!(frame.data["content"]
            .as_str()
            .unwrap()
            .starts_with("Unauthorized: "));

        let host = HandlerError::host("host is offline or unresponsive");
        let frame = host.to_frame().unwrap();
        assert_eq!(frame.message_type(), Some(MessageType::AuthorError));
        assert_eq!(frame.data["content"], "host is offline or unresponsive");

        let limited = HandlerError::RateLimited(RateLimitError::ChatWindowExceeded);
        assert_eq!(
            limited.to_frame().unwrap().message_type(),
            Some(MessageType::Error)
        );
    }

    #[test]
    fn resource_errors_are_silent() {
        assert!(HandlerError::Resource("no such session".into())
            .to_frame()
            .is_none());
    }
}
