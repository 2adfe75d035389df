use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chargelink_frame::{DeviceState, StatusFrame};
use chargelink_link::{DeviceLink, WorkerControl, WorkerHandle};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::DetectorConfig;
use crate::error::{DetectError, Result};
use crate::events::{DomainEvent, EventBus, EventKind, SubscriptionId};
use crate::resume::{BeginResume, PowerMeter, ResumeOutcome, ResumeValidator};
use crate::transitions::classify;

/// Where the detector reads device status from.
pub trait StatusSource: Send + Sync {
    /// Latest status no older than `max_age`.
    fn latest_status(&self, max_age: Duration) -> Option<StatusFrame>;
}

impl StatusSource for DeviceLink {
    fn latest_status(&self, max_age: Duration) -> Option<StatusFrame> {
        self.get_status(max_age)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Observed {
    current: Option<DeviceState>,
    previous: Option<DeviceState>,
}

struct Inner {
    source: Arc<dyn StatusSource>,
    config: DetectorConfig,
    bus: EventBus,
    state: Mutex<Observed>,
    resume: ResumeValidator,
}

impl Inner {
    fn poll_once(self: &Arc<Self>) -> Option<DomainEvent> {
        let frame = self.source.latest_status(self.config.status_max_age())?;
        self.process_status(&frame)
    }

    fn process_status(self: &Arc<Self>, frame: &StatusFrame) -> Option<DomainEvent> {
        let code = frame.state_code()?;
        let Some(state) = DeviceState::from_code(code) else {
            debug!(code, "ignoring state outside the state table");
            return None;
        };
        self.handle_state(state, Some(frame))
    }

    fn handle_state(
        self: &Arc<Self>,
        new: DeviceState,
        raw: Option<&StatusFrame>,
    ) -> Option<DomainEvent> {
        let mut observed = self.state.lock();
        let Some(current) = observed.current else {
            observed.current = Some(new);
            info!(state = %new, "baseline device state");
            return None;
        };
        if current == new {
            return None;
        }

        if current == DeviceState::Paused
            && new == DeviceState::Charging
            && self.resume.is_active()
        {
            drop(observed);
            self.begin_resume();
            return None;
        }

        observed.previous = Some(current);
        observed.current = Some(new);
        drop(observed);

        let event = DomainEvent::new(classify(current, new), current, new, raw.cloned());
        info!(event = %event.kind, from = %current, to = %new, "state transition");
        self.bus.publish(&event);
        Some(event)
    }

    fn begin_resume(self: &Arc<Self>) {
        match self.resume.try_begin(Instant::now()) {
            BeginResume::Started => {}
            BeginResume::AlreadyRunning => {
                debug!("resume validation already running");
                return;
            }
            BeginResume::CoolingDown { remaining } => {
                debug!(?remaining, "resume candidate ignored during cooldown");
                return;
            }
        }

        info!(
            min_power_kw = self.resume.config().min_power_kw,
            debounce = ?self.resume.config().debounce(),
            "validating charge resume"
        );
        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("chargelink-resume".to_string())
            .spawn(move || {
                let outcome = inner.resume.sample(|| inner.live_state());
                inner.finish_resume(outcome);
            });
        if let Err(err) = spawned {
            warn!(error = %err, "could not start resume validation");
            self.resume.finish(&ResumeOutcome::Aborted {
                observed: DeviceState::Paused,
            });
        }
    }

    fn finish_resume(&self, outcome: ResumeOutcome) {
        match outcome {
            ResumeOutcome::Confirmed { samples, power_kw } => {
                let committed = {
                    let mut observed = self.state.lock();
                    if observed.current == Some(DeviceState::Paused) {
                        observed.previous = Some(DeviceState::Paused);
                        observed.current = Some(DeviceState::Charging);
                        true
                    } else {
                        false
                    }
                };
                self.resume.finish(&outcome);

                if !committed {
                    info!("resume confirmed but state moved on, not committing");
                    return;
                }
                let raw = self.source.latest_status(self.config.status_max_age());
                let event = DomainEvent::new(
                    EventKind::ChargeStarted,
                    DeviceState::Paused,
                    DeviceState::Charging,
                    raw,
                );
                info!(samples, power_kw, "charge resume confirmed");
                self.bus.publish(&event);
            }
            ResumeOutcome::Aborted { observed } => {
                self.resume.finish(&outcome);
                info!(state = %observed, "resume validation aborted, device left CHARGING");
            }
            ResumeOutcome::Suppressed {
                samples,
                last_power_kw,
            } => {
                self.resume.finish(&outcome);
                info!(
                    samples,
                    last_power_kw = ?last_power_kw,
                    cooldown = ?self.resume.config().cooldown(),
                    "resume suppressed, power never confirmed"
                );
            }
        }
    }

    fn live_state(&self) -> Option<DeviceState> {
        self.source
            .latest_status(self.config.status_max_age())
            .and_then(|frame| frame.state())
    }
}

/// Polls a [`StatusSource`], turns state changes into [`DomainEvent`]s and
/// publishes them on its [`EventBus`].
pub struct StateDetector {
    inner: Arc<Inner>,
    control: Arc<WorkerControl>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl StateDetector {
    /// `meter` feeds resume validation; without one, PAUSED -> CHARGING is
    /// committed like any other transition.
    pub fn new(
        source: Arc<dyn StatusSource>,
        config: DetectorConfig,
        meter: Option<Arc<dyn PowerMeter>>,
    ) -> Result<Self> {
        config.validate()?;
        let resume = ResumeValidator::new(config.resume.clone(), meter);
        Ok(Self {
            inner: Arc::new(Inner {
                source,
                config,
                bus: EventBus::new(),
                state: Mutex::new(Observed::default()),
                resume,
            }),
            control: Arc::new(WorkerControl::new()),
            worker: Mutex::new(None),
        })
    }

    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        if !self.control.try_start() {
            return Err(DetectError::Spawn {
                name: "detector",
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "previous detector thread still running",
                ),
            });
        }

        let inner = Arc::clone(&self.inner);
        let control = Arc::clone(&self.control);
        let interval = self.inner.config.poll_interval();
        let handle = WorkerHandle::spawn("chargelink-detector", Arc::clone(&self.control), move || {
            while control.is_running() {
                inner.poll_once();
                if !control.sleep(interval) {
                    break;
                }
            }
        })
        .map_err(|source| DetectError::Spawn {
            name: "detector",
            source,
        })?;
        *worker = Some(handle);
        info!(interval = ?interval, "state detector started");
        Ok(())
    }

    /// Stop polling. A running resume validation finishes on its own.
    pub fn stop(&self) {
        if let Some(handle) = self.worker.lock().take() {
            if !handle.stop(self.inner.config.join_timeout()) {
                warn!("detector thread left running");
            }
            info!("state detector stopped");
        }
    }

    /// Read the source once and process whatever it returns.
    pub fn poll_once(&self) -> Option<DomainEvent> {
        self.inner.poll_once()
    }

    /// Feed one status frame. Returns the event published synchronously, if
    /// any. A confirmed resume is published later from the validation thread.
    pub fn process_status(&self, frame: &StatusFrame) -> Option<DomainEvent> {
        self.inner.process_status(frame)
    }

    pub fn handle_state(&self, state: DeviceState) -> Option<DomainEvent> {
        self.inner.handle_state(state, None)
    }

    /// Publish `CHARGE_START_REQUESTED` for the current state after the host
    /// asked the controller to start. Returns `None` before a baseline exists.
    pub fn record_start_request(&self) -> Option<DomainEvent> {
        let current = self.current_state()?;
        let raw = self
            .inner
            .source
            .latest_status(self.inner.config.status_max_age());
        let event = DomainEvent::new(EventKind::ChargeStartRequested, current, current, raw);
        info!(state = %current, "charge start requested");
        self.inner.bus.publish(&event);
        Some(event)
    }

    pub fn register<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        self.inner.bus.register(callback)
    }

    pub fn unregister(&self, id: SubscriptionId) -> bool {
        self.inner.bus.unregister(id)
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn current_state(&self) -> Option<DeviceState> {
        self.inner.state.lock().current
    }

    pub fn previous_state(&self) -> Option<DeviceState> {
        self.inner.state.lock().previous
    }

    pub fn resume_in_progress(&self) -> bool {
        self.inner.resume.in_progress()
    }
}

impl Drop for StateDetector {
    fn drop(&mut self) {
        if self.worker.get_mut().is_some() {
            self.stop();
        }
    }
}
