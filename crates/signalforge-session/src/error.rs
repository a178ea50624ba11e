use std::time::Duration;

/// Errors that can occur across a device session's lifetime.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error: dial, read or write failure.
    /// Recoverable; the controller retries with backoff.
    #[error("transport error: {0}")]
    Transport(#[from] signalforge_transport::TransportError),

    /// Wire-level error: framing or envelope codec failure.
    #[error("wire error: {0}")]
    Wire(#[from] signalforge_wire::WireError),

    /// Handshake failed on credentials or an unexpected exchange.
    /// Recoverable up to the configured attempt limit.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Handshake did not complete within the configured timeout.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The remote peer closed the connection.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// A message arrived that is not valid for the current state.
    /// Logged and ignored by the owning task; never fatal on its own.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Connection attempts exhausted; the device is locked out.
    #[error("device {device_id} locked out after {attempts} failed connection attempts")]
    LockedOut { device_id: String, attempts: u32 },

    /// `start()` was called while a session is already active.
    #[error("session already running for device {0}")]
    AlreadyRunning(String),

    /// Bad configuration. Unrecoverable; the session cannot start.
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
