use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, WireError};
use crate::message::Envelope;

/// Default maximum encoded message size: 64 KiB.
pub const DEFAULT_MAX_MESSAGE: usize = 64 * 1024;

/// Frame delimiter. Compact JSON encoding never contains a raw
/// newline, so each line on the wire is exactly one envelope.
const DELIMITER: u8 = b'\n';

/// Encode an envelope into the wire format: one line of compact JSON
/// terminated by `\n`.
pub fn encode_envelope(envelope: &Envelope, dst: &mut BytesMut) -> Result<()> {
    let json = envelope.to_json()?;
    dst.reserve(json.len() + 1);
    dst.put_slice(&json);
    dst.put_u8(DELIMITER);
    Ok(())
}

/// Decode one envelope from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete line
/// yet. On a complete line the bytes are consumed from the buffer
/// whether or not they parse: a malformed, unknown-type or oversized
/// frame is reported once and the stream stays usable for the next
/// frame. An incomplete line already past the size cap is discarded
/// outright so a peer cannot grow the buffer without bound; the
/// stream resynchronizes at the next delimiter.
pub fn decode_envelope(src: &mut BytesMut, max_message: usize) -> Result<Option<Envelope>> {
    match src.iter().position(|&byte| byte == DELIMITER) {
        Some(end) => {
            if end > max_message {
                src.advance(end + 1);
                return Err(WireError::MessageTooLarge {
                    size: end,
                    max: max_message,
                });
            }
            let line = src.split_to(end + 1);
            Envelope::from_json(&line[..end]).map(Some)
        }
        None => {
            if src.len() > max_message {
                let size = src.len();
                src.clear();
                return Err(WireError::MessageTooLarge {
                    size,
                    max: max_message,
                });
            }
            Ok(None) // Need more data
        }
    }
}

/// Configuration for the envelope codec.
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Maximum encoded message size in bytes. Default: 64 KiB.
    pub max_message_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
