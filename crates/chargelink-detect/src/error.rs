/// Errors raised by the state detector.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// A detector or validation thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },

    /// Configuration values that cannot work.
    #[error("invalid detector config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DetectError>;
