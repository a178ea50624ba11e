use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use signalforge_session::config::parse_duration;
use signalforge_session::handshake_server;
use signalforge_transport::{TcpCollector, TcpLink};
use signalforge_wire::{EnvelopeReader, EnvelopeWriter, WireConfig, WireError};

use crate::cmd::CollectorArgs;
use crate::exit::{transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_envelope, OutputFormat};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

pub fn run(args: CollectorArgs, format: OutputFormat) -> CliResult<i32> {
    let handshake_timeout = parse_duration(&args.handshake_timeout)
        .map_err(|err| CliError::new(USAGE, format!("invalid handshake timeout: {err}")))?;

    let collector =
        TcpCollector::bind(&args.bind).map_err(|err| transport_error("bind failed", err))?;
    tracing::info!(addr = %collector.local_addr(), "collector listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut handlers = Vec::new();
    let mut served = 0usize;

    while running.load(Ordering::SeqCst) {
        let (link, peer) = match collector.accept() {
            Ok(accepted) => accepted,
            Err(err) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                return Err(transport_error("accept failed", err));
            }
        };
        tracing::info!(%peer, "device connected");

        let session = Session {
            public_key: args.public_key.clone(),
            token: args.token.clone(),
            handshake_timeout,
            count: args.count,
            format,
        };
        handlers.push(std::thread::spawn(move || session.serve(link)));

        served += 1;
        if let Some(max) = args.max_sessions {
            if served >= max {
                break;
            }
        }
    }

    for handler in handlers {
        let _ = handler.join();
    }
    Ok(SUCCESS)
}

struct Session {
    public_key: String,
    token: String,
    handshake_timeout: Duration,
    count: Option<usize>,
    format: OutputFormat,
}

impl Session {
    /// Handshake one device and print its traffic until it hangs up.
    fn serve(&self, link: TcpLink) {
        let config = WireConfig {
            read_timeout: Some(self.handshake_timeout),
            ..WireConfig::default()
        };
        let reader_link = match link.try_clone() {
            Ok(half) => half,
            Err(err) => {
                tracing::warn!(error = %err, "cannot clone accepted socket");
                return;
            }
        };
        let mut reader = match EnvelopeReader::with_config_link(reader_link, config.clone()) {
            Ok(reader) => reader,
            Err(err) => {
                tracing::warn!(error = %err, "reader setup failed");
                return;
            }
        };
        let mut writer = match EnvelopeWriter::with_config_link(link, config) {
            Ok(writer) => writer,
            Err(err) => {
                tracing::warn!(error = %err, "writer setup failed");
                return;
            }
        };

        let session_id = format!("sess-{}", NEXT_SESSION.fetch_add(1, Ordering::Relaxed));
        if let Err(err) = handshake_server(
            &mut reader,
            &mut writer,
            &self.public_key,
            &self.token,
            &session_id,
            self.handshake_timeout,
        ) {
            tracing::warn!(error = %err, "handshake rejected");
            return;
        }
        tracing::info!(%session_id, "session granted");

        let mut printed = 0usize;
        loop {
            match reader.read_envelope() {
                Ok(envelope) => {
                    print_envelope(&envelope, self.format);
                    printed += 1;
                    if let Some(count) = self.count {
                        if printed >= count {
                            tracing::info!(%session_id, printed, "envelope limit reached");
                            return;
                        }
                    }
                }
                Err(WireError::Io(err))
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    // Idle device, keep waiting.
                }
                Err(err) if err.is_decode_failure() => {
                    tracing::warn!(%session_id, error = %err, "dropping undecodable frame");
                }
                Err(WireError::ConnectionClosed) => {
                    tracing::info!(%session_id, "device disconnected");
                    return;
                }
                Err(err) => {
                    tracing::warn!(%session_id, error = %err, "session ended on error");
                    return;
                }
            }
        }
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
