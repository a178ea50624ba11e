use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use signalforge_transport::TcpLink;
use signalforge_wire::{Envelope, EnvelopeReader, EnvelopeWriter, Payload, WireConfig};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::queue::InboundQueue;
use crate::status::ConnectionStatus;

/// One live TCP session to the collector.
///
/// Shared by the read loop, the heartbeat emitter, and the session
/// controller. Writes are serialized through an internal lock; status
/// and session id live behind their own lock so readers never contend
/// with in-flight sends.
pub struct Connection {
    remote_addr: String,
    state: RwLock<ConnState>,
    writer: Mutex<EnvelopeWriter<TcpLink>>,
    link: TcpLink,
    queue: InboundQueue,
    cancel: CancelToken,
    closed: AtomicBool,
}

struct ConnState {
    session_id: String,
    status: ConnectionStatus,
    last_comm: Option<DateTime<Utc>>,
}

impl Connection {
    /// Dial the collector and wrap the stream. The connection starts
    /// in `INITIALIZING` with an empty session id; authentication
    /// fills both in.
    ///
    /// Returns the connection together with a dedicated reader handle
    /// for the read loop, cloned from the same socket.
    pub fn open(
        addr: &str,
        config: &SessionConfig,
    ) -> Result<(Arc<Connection>, EnvelopeReader<TcpLink>)> {
        let link = TcpLink::connect(addr, config.handshake_timeout)?;
        Self::from_link(link, addr, config)
    }

    /// Wrap an already-established stream. Used by `open` and by
    /// collector-side accept paths.
    pub fn from_link(
        link: TcpLink,
        addr: &str,
        config: &SessionConfig,
    ) -> Result<(Arc<Connection>, EnvelopeReader<TcpLink>)> {
        let wire_config = WireConfig {
            max_message_size: config.max_message_size,
            read_timeout: Some(config.read_timeout),
            write_timeout: Some(config.write_timeout),
        };

        let reader_link = link.try_clone()?;
        let reader = EnvelopeReader::with_config_link(reader_link, wire_config.clone())?;
        let writer_link = link.try_clone()?;
        let writer = EnvelopeWriter::with_config_link(writer_link, wire_config)?;

        let connection = Arc::new(Connection {
            remote_addr: addr.to_string(),
            state: RwLock::new(ConnState {
                session_id: String::new(),
                status: ConnectionStatus::Initializing,
                last_comm: None,
            }),
            writer: Mutex::new(writer),
            link,
            queue: InboundQueue::with_capacity(crate::queue::DEFAULT_QUEUE_CAPACITY),
            cancel: CancelToken::new(),
            closed: AtomicBool::new(false),
        });

        debug!(remote = %connection.remote_addr, "connection established");
        Ok((connection, reader))
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Send one envelope, stamping the last-communication time on
    /// success.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.send(envelope)?;
        drop(writer);
        self.touch_last_comm();
        Ok(())
    }

    /// Convenience for building and sending an envelope stamped with
    /// this connection's session id.
    pub fn send_payload(&self, from: &str, payload: Payload) -> Result<()> {
        let envelope = Envelope::new(self.session_id(), from, payload);
        self.send(&envelope)
    }

    pub fn session_id(&self) -> String {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .session_id
            .clone()
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.session_id = session_id.into();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    /// Move to `next` if the lifecycle allows it. Illegal transitions
    /// are logged and ignored rather than corrupting the state graph.
    pub fn set_status(&self, next: ConnectionStatus) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.status == next {
            return;
        }
        if !state.status.can_transition_to(next) {
            warn!(
                from = %state.status,
                to = %next,
                "ignoring illegal status transition"
            );
            return;
        }
        debug!(from = %state.status, to = %next, "connection status change");
        state.status = next;
    }

    pub fn last_comm(&self) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_comm
    }

    pub fn touch_last_comm(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.last_comm = Some(Utc::now());
    }

    pub fn queue(&self) -> &InboundQueue {
        &self.queue
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear the connection down: fire the cancellation signal, shut
    /// the socket so blocked reads fail fast, close the inbound queue
    /// and mark the lifecycle `DISCONNECTED`. A locked-out connection
    /// keeps `LOCKED_OUT` as its terminal status instead. Safe to call
    /// from any task, any number of times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(remote = %self.remote_addr, "closing connection");
        self.cancel.cancel();
        if let Err(err) = self.link.shutdown() {
            debug!(error = %err, "socket shutdown during close");
        }
        self.queue.close();
        if self.status() != ConnectionStatus::LockedOut {
            self.set_status(ConnectionStatus::Disconnected);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_addr", &self.remote_addr)
            .field("session_id", &self.session_id())
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn pair() -> (Arc<Connection>, EnvelopeReader<TcpLink>, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = SessionConfig::default();
        let (connection, reader) = Connection::open(&addr.to_string(), &config).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        (connection, reader, accepted)
    }

    #[test]
    fn starts_initializing_with_no_session() {
        let (connection, _reader, _peer) = pair();
        assert_eq!(connection.status(), ConnectionStatus::Initializing);
        assert_eq!(connection.session_id(), "");
        assert!(connection.last_comm().is_none());
    }

    #[test]
    fn send_updates_last_comm() {
        let (connection, _reader, _peer) = pair();
        connection
            .send_payload(
                "oxr1234",
                Payload::Ack(signalforge_wire::AckPayload {
                    transaction_id: "txn-1".to_string(),
                }),
            )
            .unwrap();
        assert!(connection.last_comm().is_some());
    }

    #[test]
    fn illegal_transition_is_ignored() {
        let (connection, _reader, _peer) = pair();
        connection.set_status(ConnectionStatus::Connected);
        assert_eq!(connection.status(), ConnectionStatus::Initializing);

        connection.set_status(ConnectionStatus::Authenticating);
        connection.set_status(ConnectionStatus::Connected);
        assert_eq!(connection.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn close_preserves_lockout_status() {
        let (connection, _reader, _peer) = pair();
        connection.set_status(ConnectionStatus::Authenticating);
        connection.set_status(ConnectionStatus::LockedOut);

        connection.close();

        assert!(connection.is_closed());
        assert_eq!(connection.status(), ConnectionStatus::LockedOut);
    }

    #[test]
    fn close_is_idempotent_and_cancels() {
        let (connection, _reader, _peer) = pair();
        let token = connection.cancel_token();
        assert!(!token.is_cancelled());

        connection.close();
        connection.close();

        assert!(connection.is_closed());
        assert!(token.is_cancelled());
        assert!(connection.queue().is_closed());
        assert_eq!(connection.status(), ConnectionStatus::Disconnected);
    }
}
