/// Errors that can occur during envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The bytes do not parse as an envelope shell or typed payload.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The header names a message type outside the known set.
    #[error("unknown message type '{0}'")]
    UnknownType(String),

    /// The message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing envelopes.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete envelope arrived.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,
}

impl WireError {
    /// Decode failures consume the offending bytes and leave the
    /// stream usable; I/O failures and EOF do not.
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            WireError::Malformed(_)
                | WireError::UnknownType(_)
                | WireError::MessageTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WireError>;
