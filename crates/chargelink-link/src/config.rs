use std::time::Duration;

use chargelink_transport::{PortSettings, DEFAULT_PORT_KEYWORDS};
use serde::Deserialize;

/// Serial port selection and line settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Explicit port name. When unset the port is discovered by keyword.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// Delay after opening before the link is treated as usable.
    pub settle_delay_ms: u64,
    /// Case-insensitive keywords identifying the controller's USB bridge.
    pub port_keywords: Vec<String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            read_timeout_ms: 1_000,
            settle_delay_ms: 2_000,
            port_keywords: DEFAULT_PORT_KEYWORDS
                .iter()
                .map(|keyword| keyword.to_string())
                .collect(),
        }
    }
}

impl SerialConfig {
    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Reconnection backoff.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Connect attempts per reconnect call.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failed monitor ticks before escalating.
    pub escalation_threshold: u32,
    pub escalation_base_secs: u64,
    pub escalation_cap_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            escalation_threshold: 10,
            escalation_base_secs: 30,
            escalation_cap_secs: 300,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn escalation_base(&self) -> Duration {
        Duration::from_secs(self.escalation_base_secs)
    }

    pub fn escalation_cap(&self) -> Duration {
        Duration::from_secs(self.escalation_cap_secs)
    }
}

/// Command sending, ACK correlation and offline queueing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub auth_ack_timeout_ms: u64,
    pub auth_max_retries: u32,
    pub current_ack_timeout_ms: u64,
    pub current_max_retries: u32,
    /// Charge-stop is fire-and-forget unless this is set.
    pub stop_wait_for_ack: bool,
    pub stop_ack_timeout_ms: u64,
    pub stop_max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Upper bound on a single wait for the next ACK.
    pub ack_poll_interval_ms: u64,
    pub ack_queue_capacity: usize,
    pub offline_queue_capacity: usize,
    /// Queued commands older than this are dropped on replay.
    pub offline_max_age_ms: u64,
    /// Queued commands resent per replay pass.
    pub replay_batch: usize,
    /// Failed resends before a queued command is dropped.
    pub replay_max_retries: u32,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            auth_ack_timeout_ms: 3_000,
            auth_max_retries: 2,
            current_ack_timeout_ms: 2_000,
            current_max_retries: 2,
            stop_wait_for_ack: false,
            stop_ack_timeout_ms: 2_000,
            stop_max_retries: 1,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 2_000,
            ack_poll_interval_ms: 50,
            ack_queue_capacity: 20,
            offline_queue_capacity: 50,
            offline_max_age_ms: 10_000,
            replay_batch: 10,
            replay_max_retries: 3,
        }
    }
}

impl CommandConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn ack_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ack_poll_interval_ms)
    }

    pub fn offline_max_age(&self) -> Duration {
        Duration::from_millis(self.offline_max_age_ms)
    }
}

/// Monitor loop cadence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_ms: u64,
    /// Lines handled per tick before the backlog is trimmed.
    pub max_lines_per_tick: usize,
    pub join_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            max_lines_per_tick: 5,
            join_timeout_ms: 2_000,
        }
    }
}

impl MonitorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Diagnostic history buffers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub status_capacity: usize,
    pub ack_capacity: usize,
    /// Poll interval of `get_status_sync`.
    pub sync_poll_interval_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            status_capacity: 50,
            ack_capacity: 30,
            sync_poll_interval_ms: 50,
        }
    }
}

/// Status heuristics.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    pub zero_current_threshold_secs: u64,
    /// Minimum spacing between two incidents of the same kind.
    pub throttle_secs: u64,
    /// Status field carrying the measured charging current.
    pub current_field: String,
    /// Text that marks a vehicle-reported external power warning.
    pub warning_keywords: Vec<String>,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            zero_current_threshold_secs: 120,
            throttle_secs: 5,
            current_field: "CURRENT".to_string(),
            warning_keywords: vec!["EXTERNAL".to_string()],
        }
    }
}

/// Everything the device link needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub serial: SerialConfig,
    pub reconnect: ReconnectConfig,
    pub commands: CommandConfig,
    pub monitor: MonitorConfig,
    pub history: HistoryConfig,
    pub inspector: InspectorConfig,
}
