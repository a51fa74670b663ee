//! Error types for Parch wire handling.

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Frame text was not valid JSON or did not match the envelope shape
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    /// Frame data did not match the payload expected for its type
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        /// The frame type whose payload failed to decode
        kind: String,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },

    /// Frame could not be serialized
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_payload_names_the_frame_type() {
        let source = serde_json::from_str::<u8>("\"x\"").unwrap_err();
        let err = TypesError::InvalidPayload {
            kind: "join_host".into(),
            source,
        };
        assert!(err.to_string().starts_with("invalid join_host payload"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
