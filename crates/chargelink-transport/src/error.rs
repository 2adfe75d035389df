use std::io;

/// Errors that can occur while discovering, opening or using a port.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No enumerated port matched the selection keywords.
    #[error("no serial port matched the configured keywords")]
    NoMatchingPort,

    /// Port enumeration itself failed.
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(String),

    /// Failed to open the named port.
    #[error("failed to open {port}: {source}")]
    Open { port: String, source: io::Error },

    /// An I/O error occurred on an open port.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// The port is not open.
    #[error("port not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Coarse classification of an I/O failure on an open port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFailure {
    /// The device went away (unplugged, reset, claimed by another process).
    DeviceLost,
    /// Nothing arrived within the configured timeout.
    Timeout,
    /// Anything else; the port is probably still usable.
    Other,
}

/// Classify an I/O error raised by a port read or write.
pub fn classify_io_error(err: &io::Error) -> IoFailure {
    #[cfg(unix)]
    if let Some(code) = err.raw_os_error() {
        if matches!(
            code,
            libc::EIO | libc::ENXIO | libc::ENODEV | libc::EBUSY | libc::EBADF
        ) {
            return IoFailure::DeviceLost;
        }
    }

    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::NotFound => IoFailure::DeviceLost,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => IoFailure::Timeout,
        _ => IoFailure::Other,
    }
}
