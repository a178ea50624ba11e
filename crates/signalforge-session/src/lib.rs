//! Device session lifecycle management.
//!
//! One [`SessionController`] drives one device's authenticated TCP
//! session to a remote collector: connect, handshake for a session
//! identifier, then run an inbound read loop and a periodic heartbeat
//! emitter concurrently until the session is torn down.
//!
//! Field ownership under the shared locks:
//! - Connection status and session id are written only by the
//!   controller and the handshake; the read loop and heartbeat
//!   emitter observe them read-only.
//! - Device telemetry is written by the external telemetry
//!   collaborator and read by the heartbeat emitter.

pub mod cancel;
pub mod config;
pub mod connection;
pub mod controller;
pub mod device;
pub mod error;
pub mod handshake;
pub mod heartbeat;
pub mod queue;
pub mod read_loop;
pub mod status;

pub use cancel::CancelToken;
pub use config::SessionConfig;
pub use connection::Connection;
pub use controller::{ControllerState, SessionController};
pub use device::{Device, DeviceMode, SharedDevice};
pub use error::{Result, SessionError};
pub use handshake::{authenticate, handshake_server};
pub use heartbeat::run_heartbeat;
pub use queue::{InboundQueue, Pop};
pub use read_loop::run_read_loop;
pub use status::ConnectionStatus;
