use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle of a background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    StopRequested,
}

/// Shared run flag of a background worker with an interruptible sleep.
///
/// Transitions: `Idle -> Running` on start, `Running -> StopRequested` on
/// stop, back to `Idle` when the worker thread exits.
#[derive(Debug)]
pub struct WorkerControl {
    state: Mutex<WorkerState>,
    wake: Condvar,
}

impl Default for WorkerControl {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState::Idle),
            wake: Condvar::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Move `Idle -> Running`. Returns `false` if the worker is not idle.
    pub fn try_start(&self) -> bool {
        let mut state = self.state.lock();
        if *state != WorkerState::Idle {
            return false;
        }
        *state = WorkerState::Running;
        true
    }

    /// Ask a running worker to stop and wake it from any sleep.
    pub fn request_stop(&self) {
        let mut state = self.state.lock();
        if *state == WorkerState::Running {
            *state = WorkerState::StopRequested;
        }
        self.wake.notify_all();
    }

    /// Mark the worker as exited.
    pub fn finish(&self) {
        *self.state.lock() = WorkerState::Idle;
        self.wake.notify_all();
    }

    /// Sleep for `duration` unless a stop is requested first.
    ///
    /// Returns whether the worker should keep running.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut state = self.state.lock();
        while *state == WorkerState::Running {
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state == WorkerState::Running
    }
}

/// A named worker thread bound to a [`WorkerControl`].
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    control: Arc<WorkerControl>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn `body` on a new thread. `control` must already be `Running`.
    ///
    /// If the thread cannot be created, `control` is put back to `Idle` so a
    /// later start can succeed.
    pub fn spawn<F>(name: &'static str, control: Arc<WorkerControl>, body: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn_with(name, control, body, |name, task| {
            thread::Builder::new().name(name.to_string()).spawn(task)
        })
    }

    fn spawn_with<F, S>(
        name: &'static str,
        control: Arc<WorkerControl>,
        body: F,
        spawner: S,
    ) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
        S: FnOnce(&'static str, Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>,
    {
        let thread_control = Arc::clone(&control);
        let task: Box<dyn FnOnce() + Send> = Box::new(move || {
            body();
            thread_control.finish();
            debug!(worker = name, "worker exited");
        });
        match spawner(name, task) {
            Ok(thread) => Ok(Self {
                name,
                control,
                thread: Some(thread),
            }),
            Err(err) => {
                control.finish();
                warn!(worker = name, error = %err, "failed to spawn worker thread");
                Err(err)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Request a stop and wait up to `timeout` for the thread to exit.
    ///
    /// Returns `false` if the thread was still running at the deadline; it is
    /// then left detached.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.control.request_stop();
        let Some(thread) = self.thread.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(worker = self.name, ?timeout, "worker did not stop in time");
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        if thread.join().is_err() {
            warn!(worker = self.name, "worker panicked");
        }
        true
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.control.request_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn start_only_from_idle() {
        let control = WorkerControl::new();
        assert!(control.try_start());
        assert!(!control.try_start());
        control.request_stop();
        assert_eq!(control.state(), WorkerState::StopRequested);
        assert!(!control.try_start());
        control.finish();
        assert!(control.try_start());
    }

    #[test]
    fn failed_spawn_returns_control_to_idle() {
        let control = Arc::new(WorkerControl::new());
        assert!(control.try_start());

        let err = WorkerHandle::spawn_with("test-unspawnable", Arc::clone(&control), || {}, |_, _| {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "no threads left"))
        })
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(control.state(), WorkerState::Idle);
        assert!(control.try_start());
    }

    #[test]
    fn sleep_returns_immediately_when_not_running() {
        let control = WorkerControl::new();
        let started = Instant::now();
        assert!(!control.sleep(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn stop_interrupts_long_sleep() {
        let control = Arc::new(WorkerControl::new());
        assert!(control.try_start());
        let ticks = Arc::new(AtomicU32::new(0));

        let worker_control = Arc::clone(&control);
        let worker_ticks = Arc::clone(&ticks);
        let handle = WorkerHandle::spawn("test-sleeper", Arc::clone(&control), move || {
            while worker_control.is_running() {
                worker_ticks.fetch_add(1, Ordering::SeqCst);
                if !worker_control.sleep(Duration::from_secs(60)) {
                    break;
                }
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        assert!(handle.stop(Duration::from_secs(2)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert_eq!(control.state(), WorkerState::Idle);
    }

    #[test]
    fn stop_times_out_on_stuck_worker() {
        let control = Arc::new(WorkerControl::new());
        assert!(control.try_start());
        let handle = WorkerHandle::spawn("test-stuck", Arc::clone(&control), || {
            thread::sleep(Duration::from_millis(500));
        })
        .unwrap();

        assert!(!handle.stop(Duration::from_millis(20)));
    }
}
