use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod collector;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a device session against a collector.
    Run(RunArgs),
    /// Run a collector: accept devices and print their envelopes.
    Collector(CollectorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Collector(args) => collector::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Device preset (1-3).
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u8).range(1..=3))]
    pub preset: u8,
    /// Session configuration file (JSON).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Collector host, overriding the config file.
    #[arg(long, env = "SIGNALFORGE_HOST")]
    pub host: Option<String>,
    /// Collector port, overriding the config file.
    #[arg(long, env = "SIGNALFORGE_PORT")]
    pub port: Option<u16>,
    /// Client credential presented during the handshake.
    #[arg(long, default_value = "valid-client-token")]
    pub token: String,
    /// Heartbeat interval (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s")]
    pub heartbeat_interval: String,
}

#[derive(Args, Debug)]
pub struct CollectorArgs {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:3000")]
    pub bind: String,
    /// Public key announced to connecting devices.
    #[arg(long, default_value = "server-pubkey")]
    pub public_key: String,
    /// Credential devices must present.
    #[arg(long, default_value = "valid-client-token")]
    pub token: String,
    /// Handshake timeout per device (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
    /// Exit after serving N device sessions.
    #[arg(long)]
    pub max_sessions: Option<usize>,
    /// Per session, close after printing N envelopes.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
