//! Typed message envelopes with newline-delimited JSON framing.
//!
//! Every message on the wire is one self-describing envelope:
//! - A header carrying connection id, transaction id, sender, message
//!   type, and an RFC3339 timestamp
//! - A payload whose shape is determined by the header's message type
//! - An optional list of accumulated device faults
//!
//! The field set and names are fixed: the remote collector is an
//! external, unmodifiable peer. Decoding dispatches on the header's
//! type field and returns a typed error for anything it does not
//! recognize; it never panics on hostile input.

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{decode_envelope, encode_envelope, WireConfig, DEFAULT_MAX_MESSAGE};
pub use error::{Result, WireError};
pub use message::{
    AckPayload, AlertLevel, AuthGrant, AuthRequest, DeviceFault, Envelope, Header,
    HeartbeatPayload, MessageType, Payload, ServerHello,
};
pub use reader::EnvelopeReader;
pub use writer::EnvelopeWriter;
