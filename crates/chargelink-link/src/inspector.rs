use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use chargelink_frame::{DeviceState, FieldValue, StatusFrame};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::InspectorConfig;

/// Something in the telemetry worth an operator's attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentKind {
    /// The vehicle reported an external power warning.
    ExternalPowerWarning,
    /// The controller says it is charging but no current flows.
    ZeroCurrentWhileCharging,
}

impl IncidentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IncidentKind::ExternalPowerWarning => "EXTERNAL_POWER_WARNING",
            IncidentKind::ZeroCurrentWhileCharging => "ZERO_CURRENT_WHILE_CHARGING",
        }
    }
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub kind: IncidentKind,
    pub message: String,
    #[serde(skip)]
    pub raised_at: SystemTime,
}

#[derive(Debug, Default)]
struct InspectorState {
    zero_current_since: Option<Instant>,
    last_raised: HashMap<IncidentKind, Instant>,
}

/// Watches status frames for conditions the state machine cannot express.
/// Each incident kind is raised at most once per throttle window.
#[derive(Debug)]
pub struct StatusInspector {
    config: InspectorConfig,
    state: Mutex<InspectorState>,
}

impl StatusInspector {
    pub fn new(config: InspectorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(InspectorState::default()),
        }
    }

    pub fn inspect(&self, frame: &StatusFrame) -> Vec<Incident> {
        self.inspect_at(frame, Instant::now())
    }

    pub fn inspect_at(&self, frame: &StatusFrame, now: Instant) -> Vec<Incident> {
        let mut state = self.state.lock();
        let mut found = Vec::new();

        if let Some((key, text)) = self.external_warning(frame) {
            found.push((
                IncidentKind::ExternalPowerWarning,
                format!("vehicle reported external power warning ({key}={text})"),
            ));
        }

        let zero_current = frame.state() == Some(DeviceState::Charging)
            && frame
                .get(&self.config.current_field)
                .and_then(FieldValue::as_f64)
                .is_some_and(|amps| amps.abs() < f64::EPSILON);
        if zero_current {
            let since = *state.zero_current_since.get_or_insert(now);
            let threshold = Duration::from_secs(self.config.zero_current_threshold_secs);
            let elapsed = now.saturating_duration_since(since);
            if elapsed >= threshold {
                found.push((
                    IncidentKind::ZeroCurrentWhileCharging,
                    format!(
                        "charging with zero {} for {}s",
                        self.config.current_field,
                        elapsed.as_secs()
                    ),
                ));
            }
        } else {
            state.zero_current_since = None;
        }

        let throttle = Duration::from_secs(self.config.throttle_secs);
        let raised_at = frame.captured_at();
        found
            .into_iter()
            .filter(|(kind, _)| {
                let due = state
                    .last_raised
                    .get(kind)
                    .is_none_or(|last| now.saturating_duration_since(*last) >= throttle);
                if due {
                    state.last_raised.insert(*kind, now);
                }
                due
            })
            .map(|(kind, message)| Incident {
                kind,
                message,
                raised_at,
            })
            .collect()
    }

    fn external_warning<'a>(&self, frame: &'a StatusFrame) -> Option<(&'a str, &'a str)> {
        frame.fields().iter().find_map(|(key, value)| {
            let text = value.as_str()?;
            let upper = text.to_ascii_uppercase();
            self.config
                .warning_keywords
                .iter()
                .any(|keyword| upper.contains(&keyword.to_ascii_uppercase()))
                .then_some((key.as_str(), text))
        })
    }
}
