use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use signalforge_transport::TcpLink;

use crate::codec::{decode_envelope, WireConfig};
use crate::error::{Result, WireError};
use crate::message::Envelope;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete envelopes from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete
/// envelopes or a typed failure.
pub struct EnvelopeReader<T> {
    inner: T,
    buf: BytesMut,
    config: WireConfig,
}

impl<T: Read> EnvelopeReader<T> {
    /// Create a new envelope reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new envelope reader with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete envelope (blocking).
    ///
    /// Returns `Err(WireError::ConnectionClosed)` when EOF is reached.
    /// Decode failures consume the bad frame; the reader remains
    /// usable for the next one.
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        loop {
            match decode_envelope(&mut self.buf, self.config.max_message_size) {
                Ok(Some(envelope)) => return Ok(envelope),
                Ok(None) => {}
                Err(err) => return Err(err),
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WireError::Io(err)),
            };

            if read == 0 {
                return Err(WireError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

impl EnvelopeReader<TcpLink> {
    /// Create an envelope reader for a [`TcpLink`] and apply the read
    /// timeout from config.
    pub fn with_config_link(inner: TcpLink, config: WireConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_wire_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_wire_error(err: signalforge_transport::TransportError) -> WireError {
    match err {
        signalforge_transport::TransportError::Io(io)
        | signalforge_transport::TransportError::Accept(io) => WireError::Io(io),
        signalforge_transport::TransportError::Bind { source, .. }
        | signalforge_transport::TransportError::Connect { source, .. } => WireError::Io(source),
        other => WireError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::encode_envelope;
    use crate::message::{AuthGrant, Payload};

    fn grant(session_id: &str) -> Envelope {
        Envelope::new(
            "",
            "collector",
            Payload::AuthResponse(AuthGrant {
                session_id: session_id.to_string(),
            }),
        )
    }

    #[test]
    fn read_single_envelope() {
        let envelope = grant("sess-1");
        let mut wire = BytesMut::new();
        encode_envelope(&envelope, &mut wire).unwrap();

        let mut reader = EnvelopeReader::new(Cursor::new(wire.to_vec()));
        assert_eq!(reader.read_envelope().unwrap(), envelope);
    }

    #[test]
    fn read_multiple_envelopes() {
        let first = grant("sess-1");
        let second = grant("sess-2");
        let mut wire = BytesMut::new();
        encode_envelope(&first, &mut wire).unwrap();
        encode_envelope(&second, &mut wire).unwrap();

        let mut reader = EnvelopeReader::new(Cursor::new(wire.to_vec()));
        assert_eq!(reader.read_envelope().unwrap(), first);
        assert_eq!(reader.read_envelope().unwrap(), second);
    }

    #[test]
    fn partial_read_handling() {
        let envelope = grant("sess-slow");
        let mut wire = BytesMut::new();
        encode_envelope(&envelope, &mut wire).unwrap();

        let byte_reader = ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut reader = EnvelopeReader::new(byte_reader);
        assert_eq!(reader.read_envelope().unwrap(), envelope);
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = EnvelopeReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_envelope().unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_envelope() {
        let mut wire = BytesMut::new();
        encode_envelope(&grant("sess-cut"), &mut wire).unwrap();
        let cut = wire.len() / 2;

        let mut reader = EnvelopeReader::new(Cursor::new(wire[..cut].to_vec()));
        let err = reader.read_envelope().unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }

    #[test]
    fn bad_frame_then_valid_frame() {
        let envelope = grant("sess-after-bad");
        let mut wire = BytesMut::new();
        wire.extend_from_slice(b"not json at all\n");
        encode_envelope(&envelope, &mut wire).unwrap();

        let mut reader = EnvelopeReader::new(Cursor::new(wire.to_vec()));
        let err = reader.read_envelope().unwrap_err();
        assert!(err.is_decode_failure());
        assert_eq!(reader.read_envelope().unwrap(), envelope);
    }

    #[test]
    fn oversized_message_rejected() {
        let envelope = grant("sess-big");
        let mut wire = BytesMut::new();
        encode_envelope(&envelope, &mut wire).unwrap();

        let cfg = WireConfig {
            max_message_size: 16,
            ..WireConfig::default()
        };
        let mut reader = EnvelopeReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_envelope().unwrap_err();
        assert!(matches!(err, WireError::MessageTooLarge { .. }));
    }

    #[test]
    fn interrupted_read_retries() {
        let envelope = grant("sess-eintr");
        let mut wire = BytesMut::new();
        encode_envelope(&envelope, &mut wire).unwrap();

        let inner = InterruptedThenData {
            interrupted: false,
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut reader = EnvelopeReader::new(inner);
        assert_eq!(reader.read_envelope().unwrap(), envelope);
    }

    #[test]
    fn would_block_propagates_io_error() {
        let mut reader = EnvelopeReader::new(AlwaysWouldBlock);
        let err = reader.read_envelope().unwrap_err();
        assert!(matches!(err, WireError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let n = (self.bytes.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct AlwaysWouldBlock;

    impl Read for AlwaysWouldBlock {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }
    }
}
