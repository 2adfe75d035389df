//! Device communication with the charge controller.
//!
//! [`DeviceLink`] is the entry point. It owns a [`ConnectionManager`] (port
//! discovery, open/close, reconnect with backoff), a [`CommandSender`]
//! (serialized writes, ACK correlation, offline queue) and a background
//! [`MonitorWorker`] that turns incoming lines into status and ACK frames.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod inspector;
pub mod link;
pub mod monitor;
pub mod queue;
pub mod sender;
pub mod worker;

pub use backoff::{escalation_delay, exponential_delay};
pub use config::{
    CommandConfig, HistoryConfig, InspectorConfig, LinkConfig, MonitorConfig, ReconnectConfig,
    SerialConfig,
};
pub use connection::{ConnectionManager, ConnectionSnapshot};
pub use error::{LinkError, Result};
pub use inspector::{Incident, IncidentKind, StatusInspector};
pub use link::{DeviceLink, IncidentHandler};
pub use monitor::{FrameHandler, MonitorWorker, TickOutcome};
pub use queue::{AckQueue, OfflineQueue, QueuedCommand};
pub use sender::{AckPolicy, CommandSender, ReplayStats};
pub use worker::{WorkerControl, WorkerHandle, WorkerState};
