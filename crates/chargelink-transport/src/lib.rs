//! Byte-stream port abstraction for the charge-controller link.
//!
//! This is the lowest layer of chargelink. It hides the serial backend behind
//! the [`Port`] and [`PortProvider`] traits, and carries the heuristic used
//! to find the controller's USB-serial bridge when no port is configured.

pub mod error;
pub mod serial;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod traits;

pub use error::{classify_io_error, IoFailure, Result, TransportError};
pub use serial::{SerialDevice, SystemPorts};
pub use traits::{
    select_port, Port, PortDescriptor, PortKind, PortProvider, PortSettings,
    DEFAULT_PORT_KEYWORDS,
};
