use thiserror::Error;

/// Result type alias for topic-rpc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the RPC-over-broker layer
#[derive(Error, Debug)]
pub enum Error {
    /// AMQP connection or channel errors
    #[error("AMQP error: {0}")]
    Connection(#[from] lapin::Error),

    /// The connection manager has no live connection
    #[error("not connected to the broker")]
    NotConnected,

    /// Envelope serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The reply did not arrive before the call's deadline
    #[error("RPC call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The responder reported a failure inside the reply envelope
    #[error("remote error [{code}]: {message}")]
    Remote { code: String, message: String },

    /// A delivery on the reply queue carried a foreign correlation id.
    /// The delivery was requeued; the call produced no response.
    #[error("correlation mismatch: expected {expected}, received {received}")]
    CorrelationMismatch { expected: String, received: String },

    /// The responder sent an empty body instead of an envelope
    #[error("empty reply from responder")]
    EmptyReply,

    /// The reply consumer stream ended before a delivery arrived
    #[error("reply stream closed before a delivery arrived")]
    ReplyStreamClosed,

    /// Domain handler errors
    #[error("handler error: {0}")]
    Handler(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a new handler error
    pub fn handler_error<T: ToString>(message: T) -> Self {
        Self::Handler(message.to_string())
    }

    /// Create a new config error
    pub fn config_error<T: ToString>(message: T) -> Self {
        Self::Config(message.to_string())
    }

    /// Check if the caller may reasonably re-issue the call with a fresh
    /// correlation id. This layer never retries on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout { .. } | Self::Io(_) | Self::EmptyReply
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_recoverable() {
        assert!(Error::Timeout { timeout_ms: 5000 }.is_recoverable());
        assert!(!Error::Handler("boom".into()).is_recoverable());
        assert!(!Error::CorrelationMismatch {
            expected: "a".into(),
            received: "b".into()
        }
        .is_recoverable());
    }

    #[test]
    fn remote_error_display() {
        let err = Error::Remote {
            code: "HANDLER_ERROR".into(),
            message: "row not found".into(),
        };
        assert_eq!(err.to_string(), "remote error [HANDLER_ERROR]: row not found");
    }
}
