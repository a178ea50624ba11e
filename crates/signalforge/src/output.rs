use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use signalforge_wire::{Envelope, Payload};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

pub fn print_envelope(envelope: &Envelope, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => match envelope.to_json() {
            Ok(bytes) => {
                let mut out = std::io::stdout();
                let _ = out.write_all(&bytes);
                let _ = out.write_all(b"\n");
                let _ = out.flush();
            }
            Err(err) => tracing::warn!(error = %err, "failed to render envelope"),
        },
        OutputFormat::Pretty => {
            println!(
                "type={} from={} session={} txn={} {}",
                envelope.headers.message_type,
                envelope.headers.from,
                display_or_dash(&envelope.headers.connection_id),
                envelope.headers.transaction_id,
                summarize(envelope)
            );
        }
    }
}

fn display_or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

fn summarize(envelope: &Envelope) -> String {
    let body = match &envelope.payload {
        Payload::Heartbeat(hb) => format!(
            "device={} temp={:.1} mode={} status={}",
            hb.device_id, hb.temperature, hb.mode, hb.connection_status
        ),
        Payload::Handshake(hello) => format!("public_key={}", hello.public_key),
        Payload::AuthRequest(_) => "credential presented".to_string(),
        Payload::AuthResponse(grant) => format!("session_id={}", grant.session_id),
        Payload::Ack(ack) => format!("acks={}", ack.transaction_id),
        Payload::Command(value)
        | Payload::Data(value)
        | Payload::Error(value)
        | Payload::Response(value) => value.to_string(),
    };
    match envelope.highest_alert() {
        Some(level) => format!("{body} faults={} alert={level}", envelope.errors.len()),
        None => body,
    }
}
