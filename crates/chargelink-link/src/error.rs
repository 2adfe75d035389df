/// Errors that can occur on the device link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] chargelink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] chargelink_frame::FrameError),

    /// The link is down.
    #[error("link not connected")]
    NotConnected,

    /// Reconnection has been switched off.
    #[error("reconnection disabled")]
    ReconnectDisabled,

    /// Every reconnection attempt failed.
    #[error("reconnection failed after {attempts} attempts")]
    ReconnectFailed { attempts: u32 },

    /// Requested charging current is outside what the controller accepts.
    #[error("amperage {0} outside 6..=32 A")]
    InvalidAmperage(i64),

    /// The controller answered with an adverse status.
    #[error("{command} rejected by controller: {status}")]
    AckRejected { command: String, status: String },

    /// No matching acknowledgement arrived.
    #[error("no {command} acknowledgement after {attempts} attempts")]
    AckTimeout { command: String, attempts: u32 },

    /// A background worker could not be started.
    #[error("failed to spawn {name} worker: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LinkError>;
