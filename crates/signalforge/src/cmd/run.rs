use std::sync::Arc;

use signalforge_session::config::parse_duration;
use signalforge_session::{Device, DeviceMode, SessionConfig, SessionController};

use crate::cmd::RunArgs;
use crate::exit::{session_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::OutputFormat;

pub fn run(args: RunArgs, _format: OutputFormat) -> CliResult<i32> {
    let mut config = load_config(&args)?;
    if let Some(host) = &args.host {
        config.server_host = host.clone();
    }
    if let Some(port) = args.port {
        config.server_port = port;
    }

    let interval = parse_duration(&args.heartbeat_interval)
        .map_err(|err| CliError::new(USAGE, format!("invalid heartbeat interval: {err}")))?;

    let device = preset_device(args.preset, interval);
    tracing::info!(
        device = %device.id,
        serial = %device.serial_number,
        mode = %device.mode,
        collector = %config.server_addr(),
        "starting device session"
    );

    let controller = Arc::new(
        SessionController::new(device.into_shared(), args.token, config)
            .map_err(|err| session_error("controller setup failed", err))?,
    );

    install_ctrlc_handler(Arc::clone(&controller))?;

    controller
        .start()
        .map_err(|err| session_error("session failed", err))?;
    Ok(SUCCESS)
}

fn load_config(args: &RunArgs) -> CliResult<SessionConfig> {
    let Some(path) = &args.config else {
        return Ok(SessionConfig::default());
    };
    let bytes = std::fs::read(path)
        .map_err(|err| CliError::new(USAGE, format!("cannot read {}: {err}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| CliError::new(USAGE, format!("invalid config {}: {err}", path.display())))
}

fn preset_device(preset: u8, interval: std::time::Duration) -> Device {
    use signalforge_wire::{AlertLevel, DeviceFault};
    match preset {
        2 => {
            let mut device = Device::new("oxr5678", "O2R-SN8910", DeviceMode::Auto, interval);
            device.record_fault(DeviceFault::new(
                "E1001",
                "Warning: device needs calibrated",
                AlertLevel::Low,
            ));
            device
        }
        3 => {
            let mut device =
                Device::new("oxr9101", "O2R-SN1121", DeviceMode::Maintenance, interval);
            device.record_fault(DeviceFault::new("E7001", "Faulty Intake", AlertLevel::Critical));
            device
        }
        _ => Device::new("oxr1234", "O2R-SN4567", DeviceMode::Normal, interval),
    }
}

fn install_ctrlc_handler(controller: Arc<SessionController>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, stopping session");
        controller.stop();
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
