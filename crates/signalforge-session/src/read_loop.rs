use std::io::{ErrorKind, Read};

use signalforge_wire::{EnvelopeReader, WireError};
use tracing::{debug, warn};

use crate::connection::Connection;

/// Drain inbound envelopes into the connection's queue until the
/// session ends.
///
/// Exit conditions: cancellation, a closed queue, peer disconnect, or
/// an unrecoverable transport error. Decode failures are not exit
/// conditions: the bad frame is logged and dropped, and the stream
/// stays live for the next one. The socket read timeout makes each
/// blocking read return periodically so cancellation is observed
/// within one timeout interval.
///
/// Always fires the connection's cancellation signal on the way out so
/// sibling tasks stop too.
pub fn run_read_loop<R: Read>(mut reader: EnvelopeReader<R>, connection: &Connection) {
    let cancel = connection.cancel_token();

    while !cancel.is_cancelled() {
        match reader.read_envelope() {
            Ok(envelope) => {
                connection.touch_last_comm();
                if !connection.queue().push(envelope) {
                    debug!("inbound queue closed, stopping read loop");
                    break;
                }
            }
            Err(WireError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                // Socket read timeout: loop around and re-check
                // cancellation.
                continue;
            }
            Err(err) if err.is_decode_failure() => {
                warn!(error = %err, "dropping undecodable frame");
                continue;
            }
            Err(WireError::ConnectionClosed) => {
                debug!(remote = %connection.remote_addr(), "peer closed the connection");
                break;
            }
            Err(err) => {
                warn!(error = %err, "read loop stopping on transport error");
                break;
            }
        }
    }

    cancel.cancel();
}
