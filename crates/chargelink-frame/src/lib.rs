//! Wire frames of the charge-controller protocol.
//!
//! The host talks to the controller with fixed five-byte command frames:
//! - A 1-byte header (`0x41`)
//! - A 1-byte opcode
//! - A 1-byte separator (`0x2C`)
//! - A 1-byte opcode-specific value
//! - A 1-byte footer (`0x10`)
//!
//! The controller answers with newline-terminated text frames:
//! `<STAT;K=V;...;>` telemetry and `<ACK;CMD=...;STATUS=...;>` acknowledgements.
//! Decoding is pure and never panics on malformed input.

pub mod codec;
pub mod error;
pub mod reader;
pub mod state;
pub mod writer;

pub use codec::{
    authorize, charge_stop, classify_line, decode_ack, decode_status, encode, set_current,
    status_request, validate_command, AckFrame, FieldValue, LineKind, Opcode, StatusFrame,
    COMMAND_LEN, FOOTER, HEADER, MAX_AMPERAGE, MIN_AMPERAGE, SEPARATOR, STATE_NAME_KEY, STOP_CODE,
};
pub use error::{FrameError, Result};
pub use reader::{LineReader, DEFAULT_MAX_LINE_LEN};
pub use state::{state_name, DeviceState};
pub use writer::write_command;
