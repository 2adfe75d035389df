use std::fmt;
use std::io;

use chargelink::detect::DetectError;
use chargelink::frame::FrameError;
use chargelink::link::LinkError;
use chargelink::transport::TransportError;
use chargelink::ConfigError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { source, .. } | TransportError::Io(source)
            if source.kind() == io::ErrorKind::PermissionDenied =>
        {
            io_error(context, source)
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::InvalidCommandLength { .. }
        | FrameError::InvalidOpcode(_)
        | FrameError::ValueOutOfRange { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
    }
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Transport(err) => transport_error(context, err),
        LinkError::Frame(err) => frame_error(context, err),
        LinkError::NotConnected
        | LinkError::ReconnectDisabled
        | LinkError::ReconnectFailed { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        LinkError::InvalidAmperage(_) => CliError::new(USAGE, format!("{context}: {err}")),
        LinkError::AckRejected { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        LinkError::AckTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        LinkError::Spawn { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

pub fn detect_error(context: &str, err: DetectError) -> CliError {
    match err {
        DetectError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
        DetectError::Spawn { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

pub fn config_error(err: ConfigError) -> CliError {
    match err {
        ConfigError::Read { .. } => CliError::new(USAGE, format!("config: {err}")),
        ConfigError::Parse(_) | ConfigError::Invalid(_) => {
            CliError::new(DATA_INVALID, format!("config: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_failures_map_to_distinct_codes() {
        let rejected = link_error(
            "authorize",
            LinkError::AckRejected {
                command: "AUTH".to_string(),
                status: "NOT CLEARED".to_string(),
            },
        );
        assert_eq!(rejected.code, FAILURE);
        assert!(rejected.message.starts_with("authorize: "));

        let timed_out = link_error(
            "authorize",
            LinkError::AckTimeout {
                command: "AUTH".to_string(),
                attempts: 3,
            },
        );
        assert_eq!(timed_out.code, TIMEOUT);
    }

    #[test]
    fn missing_port_is_transport_error() {
        let err = link_error("connect", LinkError::Transport(TransportError::NoMatchingPort));
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn permission_denied_on_open() {
        let err = transport_error(
            "connect",
            TransportError::Open {
                port: "/dev/ttyACM0".to_string(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            },
        );
        assert_eq!(err.code, PERMISSION_DENIED);
    }

    #[test]
    fn bad_amperage_is_usage() {
        let err = link_error("set-current", LinkError::InvalidAmperage(40));
        assert_eq!(err.code, USAGE);
    }
}
