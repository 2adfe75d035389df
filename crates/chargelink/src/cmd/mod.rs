use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chargelink::link::DeviceLink;
use chargelink::ChargelinkConfig;
use clap::{Args, Subcommand};

use crate::exit::{config_error, link_error, CliError, CliResult, TRANSPORT_ERROR, USAGE};
use crate::output::OutputFormat;

pub mod command;
pub mod monitor;
pub mod ports;
pub mod status;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports and mark the one that would be selected.
    Ports(PortsArgs),
    /// Print link state and the latest status frame.
    Status(StatusArgs),
    /// Authorize a charging session.
    Authorize,
    /// Set the charging current in amperes (6-32).
    SetCurrent(SetCurrentArgs),
    /// Stop the current charging session.
    Stop,
    /// Follow the controller and print charging events until interrupted.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Everything a subcommand needs besides its own arguments.
pub struct Context {
    pub format: OutputFormat,
    pub config: ChargelinkConfig,
}

pub fn run(command: Command, ctx: &Context) -> CliResult<i32> {
    match command {
        Command::Ports(args) => ports::run(args, ctx),
        Command::Status(args) => status::run(args, ctx),
        Command::Authorize => command::authorize(ctx),
        Command::SetCurrent(args) => command::set_current(args, ctx),
        Command::Stop => command::stop(ctx),
        Command::Monitor(args) => monitor::run(args, ctx),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Request a fresh status frame and fail if none arrives in time.
    #[arg(long)]
    pub wait: bool,
    /// How long to wait for a status frame (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct SetCurrentArgs {
    /// Charging current in amperes.
    #[arg(allow_negative_numbers = true)]
    pub amperage: i64,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
    /// File holding the live charging power in kW, used to confirm resumes.
    #[arg(long, value_name = "FILE")]
    pub meter_file: Option<PathBuf>,
    /// Authorize charging once the first state is known.
    #[arg(long)]
    pub authorize: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Load the config file if one is given, then apply flag/env overrides.
pub fn load_config(
    path: Option<&Path>,
    port: Option<String>,
    baud: Option<u32>,
) -> CliResult<ChargelinkConfig> {
    let mut config = match path {
        Some(path) => ChargelinkConfig::load(path).map_err(config_error)?,
        None => ChargelinkConfig::default(),
    };
    if let Some(port) = port {
        config.link.serial.port = Some(port);
    }
    if let Some(baud) = baud {
        if baud == 0 {
            return Err(CliError::new(USAGE, "baud rate must be greater than zero"));
        }
        config.link.serial.baud_rate = baud;
    }
    Ok(config)
}

/// Start a device link. With `require_connection`, a controller that cannot
/// be reached is an error instead of something to retry in the background.
pub fn open_link(ctx: &Context, require_connection: bool) -> CliResult<Arc<DeviceLink>> {
    let link = Arc::new(DeviceLink::system(ctx.config.link.clone()));
    link.start().map_err(|err| link_error("start failed", err))?;

    if require_connection && !link.is_connected() {
        let reason = link
            .connection()
            .last_error
            .unwrap_or_else(|| "controller not reachable".to_string());
        link.stop();
        return Err(CliError::new(
            TRANSPORT_ERROR,
            format!("connect failed: {reason}"),
        ));
    }
    Ok(link)
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 3 ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_durations() {
        for input in ["", "0s", "fast", "-1s", "1m"] {
            let err = parse_duration(input).unwrap_err();
            assert_eq!(err.code, USAGE, "input {input:?}");
        }
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let config = load_config(None, Some("/dev/ttyACM1".to_string()), Some(57_600)).unwrap();
        assert_eq!(config.link.serial.port.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(config.link.serial.baud_rate, 57_600);
        assert_eq!(config.link.serial.read_timeout_ms, 1_000);
    }

    #[test]
    fn zero_baud_is_rejected() {
        assert_eq!(load_config(None, None, Some(0)).unwrap_err().code, USAGE);
    }

    #[test]
    fn missing_config_file_is_usage_error() {
        let err = load_config(Some(Path::new("/nonexistent/chargelink.json")), None, None)
            .unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}
