use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use signalforge_wire::{AckPayload, Envelope, Payload};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::SessionConfig;
use crate::connection::Connection;
use crate::device::SharedDevice;
use crate::error::{Result, SessionError};
use crate::handshake::authenticate;
use crate::heartbeat::run_heartbeat;
use crate::queue::Pop;
use crate::read_loop::run_read_loop;
use crate::status::ConnectionStatus;

/// How often the session loop re-checks the stop signal while waiting
/// for inbound traffic.
const INBOUND_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Lifecycle of the controller itself, distinct from the per-TCP
/// connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Connecting,
    Handshaking,
    Running,
    Stopping,
}

/// Owns one device's session: dials, authenticates, runs the session
/// tasks, reconnects after transport drops and tears everything down
/// on `stop`.
///
/// `start` runs the session on the calling thread until `stop` is
/// called from another thread or the device locks out. Exactly one
/// session per controller can be active at a time.
pub struct SessionController {
    device: SharedDevice,
    device_id: String,
    client_token: String,
    config: SessionConfig,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

struct Shared {
    state: Mutex<ControllerState>,
    state_changed: Condvar,
    connection: Mutex<Option<Arc<Connection>>>,
    stop: Mutex<CancelToken>,
}

/// A live connection together with the threads serving it. Joined by
/// the controller when the session ends.
struct SessionTasks {
    connection: Arc<Connection>,
    read: thread::JoinHandle<()>,
    beat: thread::JoinHandle<()>,
}

impl SessionController {
    pub fn new(
        device: SharedDevice,
        client_token: impl Into<String>,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;
        let device_id = device
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .id
            .clone();
        Ok(Self {
            device,
            device_id,
            client_token: client_token.into(),
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(ControllerState::Idle),
                state_changed: Condvar::new(),
                connection: Mutex::new(None),
                stop: Mutex::new(CancelToken::new()),
            }),
        })
    }

    pub fn state(&self) -> ControllerState {
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Session id of the live connection, if one is established.
    pub fn session_id(&self) -> Option<String> {
        let connection = self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        connection
            .as_ref()
            .map(|conn| conn.session_id())
            .filter(|id| !id.is_empty())
    }

    /// Connection status of the live connection, if any.
    pub fn connection_status(&self) -> Option<ConnectionStatus> {
        let connection = self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        connection.as_ref().map(|conn| conn.status())
    }

    /// Run the session until `stop` is called or the device locks out.
    ///
    /// Each connection gets a fresh attempt budget: failing
    /// `max_connection_attempts` times in a row locks the device out
    /// and returns an error, while a transport drop after a successful
    /// handshake starts the next attempt cycle from zero.
    pub fn start(&self) -> Result<()> {
        let stop = self.begin()?;
        let result = self.run(&stop);
        self.finish();
        result
    }

    /// Ask a running session to shut down and wait for it to finish.
    /// A no-op when no session is active.
    pub fn stop(&self) {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *state == ControllerState::Idle {
            return;
        }
        *state = ControllerState::Stopping;
        self.shared.state_changed.notify_all();
        drop(state);

        self.shared
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        if let Some(connection) = self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            connection.close();
        }

        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *state != ControllerState::Idle {
            state = self
                .shared
                .state_changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Claim the controller for a new session and install a fresh stop
    /// signal.
    fn begin(&self) -> Result<CancelToken> {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *state != ControllerState::Idle {
            return Err(SessionError::AlreadyRunning(self.device_id.clone()));
        }
        *state = ControllerState::Connecting;
        self.shared.state_changed.notify_all();

        // Drop any locked-out connection kept from the previous run.
        *self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;

        let token = CancelToken::new();
        *self
            .shared
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();
        Ok(token)
    }

    fn finish(&self) {
        // A locked-out connection stays queryable after `start`
        // returns; everything else is gone with the session.
        let mut connection = self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if connection
            .as_ref()
            .is_none_or(|conn| conn.status() != ConnectionStatus::LockedOut)
        {
            *connection = None;
        }
        drop(connection);
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *state = ControllerState::Idle;
        self.shared.state_changed.notify_all();
    }

    fn run(&self, stop: &CancelToken) -> Result<()> {
        loop {
            let tasks = match self.establish(stop)? {
                Some(tasks) => tasks,
                // Stop was requested during connection attempts.
                None => return Ok(()),
            };

            let stopped = self.run_session(tasks, stop);
            if stopped {
                return Ok(());
            }

            info!(device = %self.device_id, "session dropped, reconnecting");
        }
    }

    /// Dial and authenticate, retrying with backoff up to the attempt
    /// limit. `Ok(None)` means stop was requested mid-cycle.
    fn establish(&self, stop: &CancelToken) -> Result<Option<SessionTasks>> {
        let addr = self.config.server_addr();

        for attempt in 1..=self.config.max_connection_attempts {
            if stop.is_cancelled() {
                return Ok(None);
            }

            self.set_state(ControllerState::Connecting);
            info!(
                device = %self.device_id,
                %addr,
                attempt,
                max = self.config.max_connection_attempts,
                "connecting"
            );

            let last_attempt = attempt == self.config.max_connection_attempts;
            match self.try_connect(&addr, last_attempt) {
                Ok(tasks) => {
                    self.set_state(ControllerState::Running);
                    info!(
                        device = %self.device_id,
                        session = %tasks.connection.session_id(),
                        "session established"
                    );
                    return Ok(Some(tasks));
                }
                Err(err) if last_attempt => {
                    warn!(device = %self.device_id, error = %err, "final connection attempt failed");
                }
                Err(err) => {
                    warn!(device = %self.device_id, error = %err, "connection attempt failed");
                    if stop.wait_timeout(self.config.connection_attempt_delay) {
                        return Ok(None);
                    }
                }
            }
        }

        warn!(
            device = %self.device_id,
            attempts = self.config.max_connection_attempts,
            lockout = ?self.config.connection_lockout,
            "device locked out"
        );
        Err(SessionError::LockedOut {
            device_id: self.device_id.clone(),
            attempts: self.config.max_connection_attempts,
        })
    }

    /// One dial-and-handshake attempt. The connection never escapes
    /// half-open: any failure after the dial closes it. A handshake
    /// failure on the final attempt marks the connection `LOCKED_OUT`
    /// and keeps it queryable so the lockout is observable.
    fn try_connect(&self, addr: &str, last_attempt: bool) -> Result<SessionTasks> {
        let (connection, mut reader) = Connection::open(addr, &self.config)?;

        self.set_state(ControllerState::Handshaking);
        let session_id = match authenticate(
            &connection,
            &mut reader,
            &self.device_id,
            &self.client_token,
            self.config.handshake_timeout,
        ) {
            Ok(session_id) => session_id,
            Err(err) => {
                if last_attempt {
                    connection.set_status(ConnectionStatus::LockedOut);
                    *self
                        .shared
                        .connection
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) =
                        Some(Arc::clone(&connection));
                }
                connection.close();
                return Err(err);
            }
        };

        connection.set_session_id(session_id);
        connection.set_status(ConnectionStatus::Connected);
        *self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&connection));

        // Hand the reader to the read loop thread.
        let read_handle = {
            let connection = Arc::clone(&connection);
            thread::spawn(move || run_read_loop(reader, &connection))
        };
        let beat_handle = {
            let connection = Arc::clone(&connection);
            let device = Arc::clone(&self.device);
            let interval = device
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .heartbeat_interval;
            let max_failures = self.config.max_retries_on_error;
            thread::spawn(move || run_heartbeat(&connection, &device, interval, max_failures))
        };
        Ok(SessionTasks {
            connection,
            read: read_handle,
            beat: beat_handle,
        })
    }

    /// Consume inbound traffic until the session ends. Returns true if
    /// the end was a requested stop, false if the transport dropped
    /// and a reconnect is in order.
    fn run_session(&self, tasks: SessionTasks, stop: &CancelToken) -> bool {
        let connection = &tasks.connection;
        let cancel = connection.cancel_token();
        loop {
            if stop.is_cancelled() {
                connection.close();
                break;
            }
            if cancel.is_cancelled() {
                break;
            }

            match connection.queue().pop_timeout(INBOUND_POLL_INTERVAL) {
                Pop::Item(envelope) => self.handle_inbound(connection, &envelope),
                Pop::Empty => continue,
                Pop::Closed => break,
            }
        }

        let stopped = stop.is_cancelled();
        if !stopped {
            // Transport-side drop: record the reconnect intent before
            // the connection is torn down.
            connection.set_status(ConnectionStatus::Reconnecting);
        }
        connection.close();
        let _ = tasks.read.join();
        let _ = tasks.beat.join();
        *self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        stopped
    }

    fn handle_inbound(&self, connection: &Arc<Connection>, envelope: &Envelope) {
        match &envelope.payload {
            Payload::Command(body) => {
                debug!(
                    transaction = %envelope.headers.transaction_id,
                    "command received"
                );
                if body.get("command").and_then(|cmd| cmd.as_str())
                    == Some("acknowledge_faults")
                {
                    let cleared = self
                        .device
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .acknowledge_faults();
                    info!(device = %self.device_id, count = cleared.len(), "faults acknowledged");
                }
                let ack = Payload::Ack(AckPayload {
                    transaction_id: envelope.headers.transaction_id.clone(),
                });
                if let Err(err) = connection.send_payload(&self.device_id, ack) {
                    warn!(error = %err, "failed to acknowledge command");
                }
            }
            Payload::Ack(ack) => {
                debug!(transaction = %ack.transaction_id, "ack received");
            }
            Payload::Data(_) | Payload::Error(_) | Payload::Response(_) => {
                debug!(
                    message_type = %envelope.headers.message_type,
                    transaction = %envelope.headers.transaction_id,
                    "inbound message"
                );
            }
            Payload::Heartbeat(_) => {
                debug!(from = %envelope.headers.from, "peer heartbeat");
            }
            Payload::Handshake(_) | Payload::AuthRequest(_) | Payload::AuthResponse(_) => {
                // Auth traffic has no business arriving mid-session.
                let violation = SessionError::ProtocolViolation(format!(
                    "{} envelope on an established session",
                    envelope.headers.message_type
                ));
                warn!(error = %violation, "ignoring inbound envelope");
            }
        }
    }

    fn set_state(&self, next: ControllerState) {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // A stop request wins over internal progress updates.
        if *state == ControllerState::Stopping && next != ControllerState::Idle {
            return;
        }
        *state = next;
        self.shared.state_changed.notify_all();
    }
}
