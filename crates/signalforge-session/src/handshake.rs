use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use signalforge_wire::{
    AuthGrant, AuthRequest, Envelope, EnvelopeReader, EnvelopeWriter, Payload, ServerHello,
    WireError,
};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{Result, SessionError};
use crate::status::ConnectionStatus;

/// Run the client side of the three-step handshake and return the
/// granted session id.
///
/// The exchange is collector-first: the collector announces itself
/// with a `handshake` envelope, the device answers with its credential
/// and the collector grants a session id. Every receive is bounded by
/// `timeout`; a silent or slow collector produces a timeout, never a
/// hang. Any out-of-order or malformed step fails the whole handshake.
pub fn authenticate<R: Read>(
    connection: &Connection,
    reader: &mut EnvelopeReader<R>,
    device_id: &str,
    client_token: &str,
    timeout: Duration,
) -> Result<String> {
    connection.set_status(ConnectionStatus::Authenticating);
    let deadline = Instant::now() + timeout;

    let hello = recv_step(reader, deadline, timeout)?;
    let public_key = match hello.payload {
        Payload::Handshake(ServerHello { public_key }) => public_key,
        other => {
            return Err(SessionError::HandshakeFailed(format!(
                "expected handshake, got {}",
                other.message_type()
            )))
        }
    };
    debug!(%public_key, "collector hello received");

    connection.send_payload(
        device_id,
        Payload::AuthRequest(AuthRequest {
            client_token: client_token.to_string(),
        }),
    )?;

    let grant = recv_step(reader, deadline, timeout)?;
    match grant.payload {
        Payload::AuthResponse(AuthGrant { session_id }) if !session_id.is_empty() => {
            debug!(%session_id, "session granted");
            Ok(session_id)
        }
        Payload::AuthResponse(_) => Err(SessionError::HandshakeFailed(
            "collector granted an empty session id".to_string(),
        )),
        other => Err(SessionError::HandshakeFailed(format!(
            "expected auth_response, got {}",
            other.message_type()
        ))),
    }
}

/// Run the collector side of the handshake on an accepted stream:
/// announce the public key, verify the presented credential and grant
/// `session_id`.
pub fn handshake_server<R: Read, W: Write>(
    reader: &mut EnvelopeReader<R>,
    writer: &mut EnvelopeWriter<W>,
    public_key: &str,
    expected_token: &str,
    session_id: &str,
    timeout: Duration,
) -> Result<()> {
    writer.send(&Envelope::new(
        "",
        "collector",
        Payload::Handshake(ServerHello {
            public_key: public_key.to_string(),
        }),
    ))?;

    let deadline = Instant::now() + timeout;
    let request = recv_step(reader, deadline, timeout)?;
    let token = match request.payload {
        Payload::AuthRequest(AuthRequest { client_token }) => client_token,
        other => {
            return Err(SessionError::HandshakeFailed(format!(
                "expected auth_request, got {}",
                other.message_type()
            )))
        }
    };

    if token != expected_token {
        warn!(from = %request.headers.from, "rejecting unknown credential");
        return Err(SessionError::HandshakeFailed(
            "client presented an invalid token".to_string(),
        ));
    }

    writer.send(&Envelope::new(
        session_id,
        "collector",
        Payload::AuthResponse(AuthGrant {
            session_id: session_id.to_string(),
        }),
    ))?;
    Ok(())
}

/// Receive one handshake step before `deadline`.
///
/// Socket read timeouts surface as `WouldBlock`/`TimedOut` and are
/// retried until the deadline passes, so a short socket timeout keeps
/// the wait responsive without failing the exchange early.
fn recv_step<R: Read>(
    reader: &mut EnvelopeReader<R>,
    deadline: Instant,
    timeout: Duration,
) -> Result<Envelope> {
    loop {
        match reader.read_envelope() {
            Ok(envelope) => return Ok(envelope),
            Err(WireError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                if Instant::now() >= deadline {
                    return Err(SessionError::Timeout(timeout));
                }
            }
            Err(WireError::ConnectionClosed) => {
                return Err(SessionError::Disconnected(
                    "peer closed the connection during handshake".to_string(),
                ))
            }
            Err(err) if err.is_decode_failure() => {
                return Err(SessionError::HandshakeFailed(format!(
                    "invalid handshake frame: {err}"
                )))
            }
            Err(err) => return Err(err.into()),
        }
    }
}
