//! TCP transport layer for signalforge device sessions.
//!
//! Provides a thin abstraction over a single bidirectional TCP byte
//! stream to a remote collector, plus the listening side used by the
//! collector binary and integration tests.
//!
//! This is the lowest layer of signalforge. Everything else builds on
//! top of the [`TcpLink`] type provided here.

pub mod error;
pub mod tcp;

pub use error::{Result, TransportError};
pub use tcp::{TcpCollector, TcpLink};
