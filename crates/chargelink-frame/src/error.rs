/// Errors that can occur while building, writing or reading frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A command frame must be exactly five bytes.
    #[error("invalid command length ({len} bytes, expected 5)")]
    InvalidCommandLength { len: usize },

    /// The opcode byte is not one the controller understands.
    #[error("unknown opcode 0x{0:02X}")]
    InvalidOpcode(u8),

    /// The value byte is outside the range the opcode accepts.
    #[error("value {value} out of range for {opcode}")]
    ValueOutOfRange { opcode: &'static str, value: u8 },

    /// An I/O error occurred while reading or writing.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream reported end-of-file.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
