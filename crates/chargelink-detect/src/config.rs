use std::time::Duration;

use serde::Deserialize;

use crate::error::{DetectError, Result};

/// Power-gated confirmation of a PAUSED -> CHARGING transition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    pub enabled: bool,
    /// Minimum metered power that counts as a qualifying sample.
    pub min_power_kw: f64,
    /// How long to keep sampling before giving up.
    pub debounce_seconds: f64,
    pub sample_interval_seconds: f64,
    pub required_consecutive_samples: u32,
    /// Candidates arriving this soon after a suppression are ignored.
    pub suppress_cooldown_seconds: f64,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_power_kw: 1.0,
            debounce_seconds: 10.0,
            sample_interval_seconds: 1.0,
            required_consecutive_samples: 3,
            suppress_cooldown_seconds: 30.0,
        }
    }
}

impl ResumeConfig {
    pub fn debounce(&self) -> Duration {
        seconds(self.debounce_seconds)
    }

    pub fn sample_interval(&self) -> Duration {
        seconds(self.sample_interval_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        seconds(self.suppress_cooldown_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("debounce_seconds", self.debounce_seconds),
            ("sample_interval_seconds", self.sample_interval_seconds),
            ("suppress_cooldown_seconds", self.suppress_cooldown_seconds),
            ("min_power_kw", self.min_power_kw),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(DetectError::Config(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.sample_interval_seconds == 0.0 {
            return Err(DetectError::Config(
                "sample_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.required_consecutive_samples == 0 {
            return Err(DetectError::Config(
                "required_consecutive_samples must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Poll cadence of the state detector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub poll_interval_ms: u64,
    /// Status frames older than this are ignored.
    pub status_max_age_ms: u64,
    pub join_timeout_ms: u64,
    pub resume: ResumeConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            status_max_age_ms: 5_000,
            join_timeout_ms: 2_000,
            resume: ResumeConfig::default(),
        }
    }
}

impl DetectorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn status_max_age(&self) -> Duration {
        Duration::from_millis(self.status_max_age_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(DetectError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        self.resume.validate()
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
