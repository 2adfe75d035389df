//! Charging-state detection over a device link.
//!
//! [`StateDetector`] polls a [`StatusSource`] (normally a
//! [`chargelink_link::DeviceLink`]), classifies state changes into
//! [`DomainEvent`]s and publishes them on an [`EventBus`]. A PAUSED ->
//! CHARGING change is held back until a [`PowerMeter`] confirms that power is
//! actually flowing.

pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod resume;
pub mod transitions;

pub use config::{DetectorConfig, ResumeConfig};
pub use detector::{StateDetector, StatusSource};
pub use error::{DetectError, Result};
pub use events::{DomainEvent, EventBus, EventKind, SubscriptionId};
pub use resume::{BeginResume, FilePowerMeter, PowerMeter, ResumeOutcome, ResumeValidator};
pub use transitions::classify;
