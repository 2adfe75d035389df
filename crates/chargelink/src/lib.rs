//! EV charge-controller communication and charging-state detection.
//!
//! chargelink talks to a charge controller over a serial link, keeps the
//! link alive across unplugs, correlates commands with acknowledgements and
//! turns the controller's telemetry into charging-session events.
//!
//! # Crate Structure
//!
//! - [`transport`]: Port abstraction and the serial backend
//! - [`frame`]: Command encoding and STAT/ACK decoding
//! - [`link`]: Connection lifecycle, command sender and monitor thread
//! - [`detect`]: State detection, resume validation and the event bus
//! - [`config`]: Aggregate configuration loaded from JSON

pub mod config;

pub use config::{ChargelinkConfig, ConfigError};

/// Re-export transport types.
pub mod transport {
    pub use chargelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use chargelink_frame::*;
}

/// Re-export link types.
pub mod link {
    pub use chargelink_link::*;
}

/// Re-export detection types.
pub mod detect {
    pub use chargelink_detect::*;
}
