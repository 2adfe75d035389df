use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chargelink_frame::DeviceState;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::ResumeConfig;

/// Source of live charging power.
pub trait PowerMeter: Send + Sync {
    /// Current power in kW, or `None` when no reading is available.
    fn read_power_kw(&self) -> Option<f64>;
}

impl<F> PowerMeter for F
where
    F: Fn() -> Option<f64> + Send + Sync,
{
    fn read_power_kw(&self) -> Option<f64> {
        self()
    }
}

/// Reads a kW figure that an external meter process keeps in a file.
#[derive(Debug, Clone)]
pub struct FilePowerMeter {
    path: PathBuf,
}

impl FilePowerMeter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PowerMeter for FilePowerMeter {
    fn read_power_kw(&self) -> Option<f64> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "power reading unavailable");
                return None;
            }
        };
        match text.trim().parse::<f64>() {
            Ok(kw) if kw.is_finite() => Some(kw),
            _ => {
                debug!(path = %self.path.display(), "power reading is not a number");
                None
            }
        }
    }
}

/// How a resume validation ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResumeOutcome {
    /// Enough consecutive samples reached the power threshold.
    Confirmed { samples: u32, power_kw: f64 },
    /// The device left CHARGING while samples were being taken.
    Aborted { observed: DeviceState },
    /// The debounce window ran out first.
    Suppressed {
        samples: u32,
        last_power_kw: Option<f64>,
    },
}

/// Result of asking to start a validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginResume {
    Started,
    AlreadyRunning,
    /// A recent suppression is still cooling down.
    CoolingDown { remaining: Duration },
}

#[derive(Debug, Default)]
struct ResumeGate {
    in_progress: bool,
    suppressed_at: Option<Instant>,
}

/// Single-flight resume validation with a post-suppression cooldown.
///
/// The gate has its own lock so the detector's state lock is never held
/// while samples are being taken.
pub struct ResumeValidator {
    config: ResumeConfig,
    meter: Option<Arc<dyn PowerMeter>>,
    gate: Mutex<ResumeGate>,
}

impl ResumeValidator {
    pub fn new(config: ResumeConfig, meter: Option<Arc<dyn PowerMeter>>) -> Self {
        Self {
            config,
            meter,
            gate: Mutex::new(ResumeGate::default()),
        }
    }

    /// Validation runs only when configured on and a meter is attached.
    pub fn is_active(&self) -> bool {
        self.config.enabled && self.meter.is_some()
    }

    pub fn in_progress(&self) -> bool {
        self.gate.lock().in_progress
    }

    pub fn config(&self) -> &ResumeConfig {
        &self.config
    }

    pub fn try_begin(&self, now: Instant) -> BeginResume {
        let mut gate = self.gate.lock();
        if let Some(at) = gate.suppressed_at {
            let since = now.saturating_duration_since(at);
            let cooldown = self.config.cooldown();
            if since < cooldown {
                return BeginResume::CoolingDown {
                    remaining: cooldown - since,
                };
            }
        }
        if gate.in_progress {
            return BeginResume::AlreadyRunning;
        }
        gate.in_progress = true;
        BeginResume::Started
    }

    /// Close out a validation started with [`ResumeValidator::try_begin`].
    pub fn finish(&self, outcome: &ResumeOutcome) {
        let mut gate = self.gate.lock();
        gate.in_progress = false;
        if matches!(outcome, ResumeOutcome::Suppressed { .. }) {
            gate.suppressed_at = Some(Instant::now());
        }
    }

    /// Sample power until confirmed, aborted or out of time.
    ///
    /// `live_state` reports the device's current state, `None` when unknown.
    /// Unknown states do not abort the validation.
    pub fn sample<F>(&self, live_state: F) -> ResumeOutcome
    where
        F: Fn() -> Option<DeviceState>,
    {
        let started = Instant::now();
        let debounce = self.config.debounce();
        let interval = self.config.sample_interval();
        let required = self.config.required_consecutive_samples.max(1);

        let mut consecutive = 0u32;
        let mut last_power_kw = None;
        loop {
            if let Some(observed) = live_state() {
                if observed != DeviceState::Charging {
                    return ResumeOutcome::Aborted { observed };
                }
            }

            let reading = self
                .meter
                .as_ref()
                .and_then(|meter| meter.read_power_kw())
                .filter(|kw| kw.is_finite());
            last_power_kw = reading.or(last_power_kw);
            match reading {
                Some(kw) if kw >= self.config.min_power_kw => {
                    consecutive += 1;
                    debug!(power_kw = kw, consecutive, required, "qualifying power sample");
                    if consecutive >= required {
                        return ResumeOutcome::Confirmed {
                            samples: consecutive,
                            power_kw: kw,
                        };
                    }
                }
                _ => {
                    if consecutive > 0 {
                        debug!(power_kw = ?reading, "power sample below threshold, restarting count");
                    }
                    consecutive = 0;
                }
            }

            if started.elapsed() >= debounce {
                return ResumeOutcome::Suppressed {
                    samples: consecutive,
                    last_power_kw,
                };
            }
            thread::sleep(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn fast_config() -> ResumeConfig {
        ResumeConfig {
            debounce_seconds: 0.5,
            sample_interval_seconds: 0.01,
            suppress_cooldown_seconds: 0.3,
            ..ResumeConfig::default()
        }
    }

    fn scripted(readings: Vec<Option<f64>>) -> Arc<dyn PowerMeter> {
        let next = AtomicUsize::new(0);
        Arc::new(move || {
            let i = next.fetch_add(1, Ordering::SeqCst);
            readings.get(i).copied().unwrap_or(Some(0.0))
        })
    }

    #[test]
    fn confirms_after_consecutive_samples() {
        let validator = ResumeValidator::new(fast_config(), Some(scripted(vec![Some(2.5); 10])));
        let outcome = validator.sample(|| Some(DeviceState::Charging));
        assert_eq!(
            outcome,
            ResumeOutcome::Confirmed {
                samples: 3,
                power_kw: 2.5
            }
        );
    }

    #[test]
    fn low_sample_restarts_count() {
        let readings = vec![Some(2.0), Some(2.0), Some(0.4), None, Some(1.0), Some(1.5), Some(3.0)];
        let meter_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&meter_calls);
        let inner = scripted(readings);
        let meter: Arc<dyn PowerMeter> = Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            inner.read_power_kw()
        });

        let validator = ResumeValidator::new(fast_config(), Some(meter));
        let outcome = validator.sample(|| None);
        assert!(matches!(outcome, ResumeOutcome::Confirmed { samples: 3, .. }));
        assert_eq!(meter_calls.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn suppressed_when_power_stays_low() {
        let validator = ResumeValidator::new(fast_config(), Some(scripted(vec![Some(0.5); 100])));
        let started = Instant::now();
        let outcome = validator.sample(|| Some(DeviceState::Charging));
        assert_eq!(
            outcome,
            ResumeOutcome::Suppressed {
                samples: 0,
                last_power_kw: Some(0.5)
            }
        );
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn aborts_when_device_leaves_charging() {
        let validator = ResumeValidator::new(fast_config(), Some(scripted(vec![Some(5.0); 10])));
        let outcome = validator.sample(|| Some(DeviceState::Paused));
        assert_eq!(
            outcome,
            ResumeOutcome::Aborted {
                observed: DeviceState::Paused
            }
        );
    }

    #[test]
    fn single_flight_and_cooldown() {
        let validator = ResumeValidator::new(fast_config(), Some(scripted(Vec::new())));
        let now = Instant::now();
        assert_eq!(validator.try_begin(now), BeginResume::Started);
        assert_eq!(validator.try_begin(now), BeginResume::AlreadyRunning);

        validator.finish(&ResumeOutcome::Suppressed {
            samples: 0,
            last_power_kw: None,
        });
        assert!(!validator.in_progress());
        assert!(matches!(
            validator.try_begin(Instant::now()),
            BeginResume::CoolingDown { .. }
        ));
        assert_eq!(
            validator.try_begin(Instant::now() + Duration::from_millis(400)),
            BeginResume::Started
        );
    }

    #[test]
    fn abort_does_not_start_cooldown() {
        let validator = ResumeValidator::new(fast_config(), Some(scripted(Vec::new())));
        assert_eq!(validator.try_begin(Instant::now()), BeginResume::Started);
        validator.finish(&ResumeOutcome::Aborted {
            observed: DeviceState::Stopped,
        });
        assert_eq!(validator.try_begin(Instant::now()), BeginResume::Started);
    }

    #[test]
    fn inactive_without_meter() {
        assert!(!ResumeValidator::new(ResumeConfig::default(), None).is_active());
        let disabled = ResumeConfig {
            enabled: false,
            ..ResumeConfig::default()
        };
        assert!(!ResumeValidator::new(disabled, Some(scripted(Vec::new()))).is_active());
    }

    #[test]
    fn file_meter_parses_trimmed_number() {
        let path = std::env::temp_dir().join(format!(
            "chargelink-meter-{}-{:?}.txt",
            std::process::id(),
            thread::current().id()
        ));
        fs::write(&path, " 7.4\n").unwrap();
        let meter = FilePowerMeter::new(&path);
        assert_eq!(meter.read_power_kw(), Some(7.4));

        fs::write(&path, "n/a").unwrap();
        assert_eq!(meter.read_power_kw(), None);

        fs::remove_file(&path).unwrap();
        assert_eq!(meter.read_power_kw(), None);
    }
}
