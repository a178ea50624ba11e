//! Device telemetry session management over TCP.
//!
//! signalforge keeps long-lived device sessions alive against a remote
//! collector: newline-delimited JSON envelopes on the wire, a
//! three-step authentication handshake, a concurrent read loop and
//! heartbeat emitter per session, and automatic reconnection.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP dial/accept with socket timeout control
//! - [`wire`]: Envelope types and the newline-delimited JSON codec
//! - [`session`]: Connection lifecycle, handshake, session controller

/// Re-export transport types.
pub mod transport {
    pub use signalforge_transport::*;
}

/// Re-export wire types.
pub mod wire {
    pub use signalforge_wire::*;
}

/// Re-export session types.
pub mod session {
    pub use signalforge_session::*;
}
