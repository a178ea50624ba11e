use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use signalforge_transport::TcpLink;

use crate::codec::{encode_envelope, WireConfig};
use crate::error::{Result, WireError};
use crate::message::Envelope;
use crate::reader::transport_to_wire_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete envelopes to any `Write` stream.
pub struct EnvelopeWriter<T> {
    inner: T,
    buf: BytesMut,
    config: WireConfig,
}

impl<T: Write> EnvelopeWriter<T> {
    /// Create a new envelope writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new envelope writer with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and send one envelope (blocking).
    pub fn send(&mut self, envelope: &Envelope) -> Result<()> {
        self.buf.clear();
        encode_envelope(envelope, &mut self.buf)?;

        // The size cap covers the JSON line only; the frame delimiter
        // is not counted, same as on the decode side.
        let line_len = self.buf.len() - 1;
        if line_len > self.config.max_message_size {
            return Err(WireError::MessageTooLarge {
                size: line_len,
                max: self.config.max_message_size,
            });
        }

        // A write timeout surfaces as WouldBlock/TimedOut and is
        // reported to the caller; the heartbeat emitter counts it as
        // a failed delivery rather than retrying a stuck socket.
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

impl EnvelopeWriter<TcpLink> {
    /// Create an envelope writer for a [`TcpLink`] and apply the write
    /// timeout from config.
    pub fn with_config_link(inner: TcpLink, config: WireConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_wire_error)?;
        Ok(Self::with_config(inner, config))
    }
}
