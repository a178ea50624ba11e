use std::sync::PoisonError;
use std::time::Duration;

use signalforge_wire::{Envelope, Payload};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::connection::Connection;
use crate::device::SharedDevice;
use crate::error::Result;
use crate::status::ConnectionStatus;

/// Destination for heartbeat envelopes. Lets the emitter be driven
/// against a fake in tests.
pub(crate) trait BeatSink {
    fn status(&self) -> ConnectionStatus;
    fn session_id(&self) -> String;
    fn deliver(&self, envelope: &Envelope) -> Result<()>;
    fn shut_down(&self);
}

impl BeatSink for Connection {
    fn status(&self) -> ConnectionStatus {
        Connection::status(self)
    }

    fn session_id(&self) -> String {
        Connection::session_id(self)
    }

    fn deliver(&self, envelope: &Envelope) -> Result<()> {
        self.send(envelope)
    }

    fn shut_down(&self) {
        self.close();
    }
}

/// Emit heartbeats for `device` until the session ends.
///
/// Ticks on `interval`, waking early on cancellation. A tick while the
/// connection is not `CONNECTED` is skipped without touching the
/// failure counter. Each delivery failure increments a consecutive
/// failure counter; a success resets it. At `max_failures` the sink is
/// shut down and the emitter stops; the peer is gone and every
/// further send would fail the same way.
pub fn run_heartbeat(
    connection: &Connection,
    device: &SharedDevice,
    interval: Duration,
    max_failures: u32,
) {
    emit_loop(
        connection,
        device,
        connection.cancel_token(),
        interval,
        max_failures,
    );
}

pub(crate) fn emit_loop<S: BeatSink>(
    sink: &S,
    device: &SharedDevice,
    cancel: CancelToken,
    interval: Duration,
    max_failures: u32,
) {
    let mut consecutive_failures = 0u32;

    loop {
        if cancel.wait_timeout(interval) {
            debug!("heartbeat emitter cancelled");
            return;
        }

        let status = sink.status();
        if status != ConnectionStatus::Connected {
            debug!(%status, "skipping heartbeat while not connected");
            continue;
        }

        let envelope = {
            let device = device.read().unwrap_or_else(PoisonError::into_inner);
            Envelope::new(
                sink.session_id(),
                device.id.clone(),
                Payload::Heartbeat(device.heartbeat_snapshot(status)),
            )
            .with_errors(device.faults().to_vec())
        };

        match sink.deliver(&envelope) {
            Ok(()) => {
                consecutive_failures = 0;
            }
            Err(err) => {
                consecutive_failures += 1;
                warn!(
                    error = %err,
                    failures = consecutive_failures,
                    max = max_failures,
                    "heartbeat delivery failed"
                );
                if consecutive_failures >= max_failures {
                    warn!("heartbeat failure limit reached, closing connection");
                    sink.shut_down();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::device::{Device, DeviceMode};
    use crate::error::SessionError;

    use super::*;

    struct FakeSink {
        status: Mutex<ConnectionStatus>,
        fail: AtomicBool,
        attempts: AtomicU32,
        shut_down: AtomicBool,
        sent: Mutex<Vec<Envelope>>,
    }

    impl FakeSink {
        fn new(status: ConnectionStatus) -> Self {
            Self {
                status: Mutex::new(status),
                fail: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                shut_down: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl BeatSink for FakeSink {
        fn status(&self) -> ConnectionStatus {
            *self.status.lock().unwrap()
        }

        fn session_id(&self) -> String {
            "sess-42".to_string()
        }

        fn deliver(&self, envelope: &Envelope) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(SessionError::Disconnected("gone".to_string()));
            }
            self.sent.lock().unwrap().push(envelope.clone());
            Ok(())
        }

        fn shut_down(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    fn device() -> SharedDevice {
        Device::new(
            "oxr1234",
            "O2R-SN4567",
            DeviceMode::Normal,
            Duration::from_millis(5),
        )
        .into_shared()
    }

    #[test]
    fn emits_while_connected_until_cancelled() {
        let sink = FakeSink::new(ConnectionStatus::Connected);
        let device = device();
        let cancel = CancelToken::new();

        std::thread::scope(|scope| {
            scope.spawn(|| emit_loop(&sink, &device, cancel.clone(), Duration::from_millis(5), 3));
            std::thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });

        let sent = sink.sent.lock().unwrap();
        assert!(!sent.is_empty());
        let first = &sent[0];
        assert_eq!(first.headers.connection_id, "sess-42");
        assert_eq!(first.headers.from, "oxr1234");
        assert!(matches!(&first.payload, Payload::Heartbeat(hb)
            if hb.connection_status == "CONNECTED"));
        assert!(!sink.shut_down.load(Ordering::SeqCst));
    }

    #[test]
    fn skips_ticks_while_not_connected() {
        let sink = FakeSink::new(ConnectionStatus::Reconnecting);
        let device = device();
        let cancel = CancelToken::new();

        std::thread::scope(|scope| {
            scope.spawn(|| emit_loop(&sink, &device, cancel.clone(), Duration::from_millis(5), 3));
            std::thread::sleep(Duration::from_millis(40));
            cancel.cancel();
        });

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn closes_sink_after_max_consecutive_failures() {
        let sink = FakeSink::new(ConnectionStatus::Connected);
        sink.fail.store(true, Ordering::SeqCst);
        let device = device();

        emit_loop(
            &sink,
            &device,
            CancelToken::new(),
            Duration::from_millis(1),
            3,
        );

        // Exactly the limit, never one more.
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        assert!(sink.shut_down.load(Ordering::SeqCst));
    }

    #[test]
    fn success_resets_failure_counter() {
        let sink = FakeSink::new(ConnectionStatus::Connected);
        sink.fail.store(true, Ordering::SeqCst);
        let device = device();
        let cancel = CancelToken::new();

        std::thread::scope(|scope| {
            scope.spawn(|| emit_loop(&sink, &device, cancel.clone(), Duration::from_millis(2), 5));
            // Two failures, then recover before the limit.
            while sink.attempts.load(Ordering::SeqCst) < 2 {
                std::thread::sleep(Duration::from_millis(1));
            }
            sink.fail.store(false, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            cancel.cancel();
        });

        assert!(!sink.shut_down.load(Ordering::SeqCst));
        assert!(!sink.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn heartbeat_carries_accumulated_faults() {
        let sink = FakeSink::new(ConnectionStatus::Connected);
        let device = device();
        device.write().unwrap().record_fault(signalforge_wire::DeviceFault::new(
            "E7001",
            "Faulty Intake",
            signalforge_wire::AlertLevel::Critical,
        ));
        let cancel = CancelToken::new();

        std::thread::scope(|scope| {
            scope.spawn(|| emit_loop(&sink, &device, cancel.clone(), Duration::from_millis(5), 3));
            std::thread::sleep(Duration::from_millis(30));
            cancel.cancel();
        });

        let sent = sink.sent.lock().unwrap();
        assert!(!sent.is_empty());
        assert_eq!(sent[0].errors.len(), 1);
        assert_eq!(sent[0].errors[0].error_code, "E7001");
    }
}
