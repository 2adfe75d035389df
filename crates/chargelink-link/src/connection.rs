use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chargelink_transport::{select_port, Port, PortProvider, TransportError};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backoff::exponential_delay;
use crate::config::{ReconnectConfig, SerialConfig};
use crate::error::{LinkError, Result};

/// Point-in-time view of the connection for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub port: Option<String>,
    pub connected: bool,
    pub reconnect_enabled: bool,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct ConnectionStatus {
    port: Option<String>,
    attempts: u32,
    last_error: Option<String>,
}

/// Owns the serial port and its lifecycle.
///
/// The opened port is split into a reader half (used only by the monitor)
/// and a writer half; the writer's mutex is the single write lock. Callers
/// must never hold one half while acquiring the other.
pub struct ConnectionManager {
    provider: Arc<dyn PortProvider>,
    serial: SerialConfig,
    reconnect: ReconnectConfig,
    reader: Mutex<Option<Box<dyn Port>>>,
    writer: Mutex<Option<Box<dyn Port>>>,
    status: Mutex<ConnectionStatus>,
    wake: Condvar,
    connected: AtomicBool,
    reconnect_enabled: AtomicBool,
    /// Bumped by every `disconnect`; a connect that straddles one is undone.
    generation: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        provider: Arc<dyn PortProvider>,
        serial: SerialConfig,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            provider,
            serial,
            reconnect,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            status: Mutex::new(ConnectionStatus::default()),
            wake: Condvar::new(),
            connected: AtomicBool::new(false),
            reconnect_enabled: AtomicBool::new(true),
            generation: AtomicU64::new(0),
        }
    }

    /// Pick the port named in config, or the first one matching a keyword.
    pub fn discover(&self) -> Result<String> {
        if let Some(port) = &self.serial.port {
            return Ok(port.clone());
        }
        let ports = self.provider.list()?;
        let selected = select_port(&ports, &self.serial.port_keywords)
            .ok_or(TransportError::NoMatchingPort)?;
        debug!(port = %selected.name, kind = %selected.kind, "discovered serial port");
        Ok(selected.name.clone())
    }

    /// Open the port and wait out the controller's post-open settle time.
    ///
    /// Any previously held handles are released first. A `disconnect` that
    /// lands while the port is being opened wins: the new handles are closed
    /// and [`LinkError::ReconnectDisabled`] is returned.
    pub fn connect(&self) -> Result<String> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.release();
        let name = self.discover()?;
        let writer = self.provider.open(&name, &self.serial.port_settings())?;
        let reader = writer
            .try_clone_port()
            .map_err(|source| TransportError::Open {
                port: name.clone(),
                source,
            })?;

        let settle = self.serial.settle_delay();
        if !settle.is_zero() {
            thread::sleep(settle);
        }

        *self.reader.lock() = Some(reader);
        *self.writer.lock() = Some(writer);
        self.status.lock().port = Some(name.clone());
        self.connected.store(true, Ordering::SeqCst);

        // disconnect bumps the generation before releasing, so either this
        // check sees the bump or that release runs after the handles above.
        if self.generation.load(Ordering::SeqCst) != generation {
            self.release();
            debug!(port = %name, "disconnected while opening, port closed again");
            return Err(LinkError::ReconnectDisabled);
        }
        info!(port = %name, baud = self.serial.baud_rate, "serial link connected");
        Ok(name)
    }

    /// Close the port, switch reconnection off and reset the attempt counter.
    pub fn disconnect(&self) {
        self.set_reconnect_enabled(false);
        self.generation.fetch_add(1, Ordering::SeqCst);
        let was_connected = self.connected.load(Ordering::SeqCst);
        self.release();
        self.status.lock().attempts = 0;
        if was_connected {
            info!("serial link disconnected");
        }
    }

    /// Record a lost link. Handles are released; reconnection stays enabled.
    pub fn mark_lost(&self, reason: &str) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.release();
        self.status.lock().last_error = Some(reason.to_string());
        if was_connected {
            warn!(reason, "serial link lost");
        }
    }

    /// Try to reopen the port up to `max_retries` times, sleeping
    /// `initial_delay * 2^attempt` (capped) between attempts.
    ///
    /// Sleeps are cut short when reconnection is disabled.
    pub fn reconnect(&self, max_retries: u32, initial_delay: Duration) -> Result<()> {
        for attempt in 0..max_retries {
            if !self.reconnect_enabled() {
                return Err(LinkError::ReconnectDisabled);
            }
            self.status.lock().attempts += 1;

            match self.connect() {
                Ok(port) => {
                    let mut status = self.status.lock();
                    status.attempts = 0;
                    status.last_error = None;
                    info!(port = %port, attempt = attempt + 1, "reconnected");
                    return Ok(());
                }
                Err(LinkError::ReconnectDisabled) => return Err(LinkError::ReconnectDisabled),
                Err(err) => {
                    warn!(attempt = attempt + 1, max_retries, error = %err, "reconnect attempt failed");
                    self.status.lock().last_error = Some(err.to_string());
                }
            }

            if attempt + 1 < max_retries {
                let delay = exponential_delay(initial_delay, attempt, self.reconnect.max_delay());
                if !self.wait_while_enabled(delay) {
                    return Err(LinkError::ReconnectDisabled);
                }
            }
        }
        Err(LinkError::ReconnectFailed {
            attempts: max_retries,
        })
    }

    /// [`ConnectionManager::reconnect`] with the configured retry budget.
    pub fn reconnect_default(&self) -> Result<()> {
        self.reconnect(self.reconnect.max_retries, self.reconnect.initial_delay())
    }

    pub fn set_reconnect_enabled(&self, enabled: bool) {
        self.reconnect_enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            let _status = self.status.lock();
            self.wake.notify_all();
        }
    }

    pub fn reconnect_enabled(&self) -> bool {
        self.reconnect_enabled.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let status = self.status.lock();
        ConnectionSnapshot {
            port: status.port.clone(),
            connected: self.is_connected(),
            reconnect_enabled: self.reconnect_enabled(),
            reconnect_attempts: status.attempts,
            last_error: status.last_error.clone(),
        }
    }

    pub(crate) fn lock_reader(&self) -> MutexGuard<'_, Option<Box<dyn Port>>> {
        self.reader.lock()
    }

    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, Option<Box<dyn Port>>> {
        self.writer.lock()
    }

    fn release(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let reader = self.reader.lock().take();
        let writer = self.writer.lock().take();
        drop((reader, writer));
    }

    fn wait_while_enabled(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut status = self.status.lock();
        while self.reconnect_enabled() {
            if self.wake.wait_until(&mut status, deadline).timed_out() {
                break;
            }
        }
        self.reconnect_enabled()
    }
}

#[cfg(test)]
mod tests {
    use chargelink_transport::testing::{MockProvider, MockWire};
    use chargelink_transport::{PortDescriptor, PortKind};

    use super::*;

    fn serial() -> SerialConfig {
        SerialConfig {
            settle_delay_ms: 0,
            ..SerialConfig::default()
        }
    }

    fn manager(provider: Arc<MockProvider>) -> ConnectionManager {
        ConnectionManager::new(provider, serial(), ReconnectConfig::default())
    }

    #[test]
    fn connect_discovers_keyword_port() {
        let provider = Arc::new(MockProvider::new(MockWire::new()));
        let conn = manager(Arc::clone(&provider));

        assert_eq!(conn.connect().unwrap(), "/dev/ttyMOCK0");
        assert!(conn.is_connected());
        assert!(conn.lock_reader().is_some());
        assert!(conn.lock_writer().is_some());
        assert_eq!(conn.snapshot().port.as_deref(), Some("/dev/ttyMOCK0"));
    }

    #[test]
    fn connect_without_matching_port_fails() {
        let provider = Arc::new(MockProvider::with_ports(
            MockWire::new(),
            vec![PortDescriptor {
                name: "/dev/ttyS0".to_string(),
                kind: PortKind::Pci,
                manufacturer: None,
                product: None,
            }],
        ));
        let conn = manager(provider);

        let err = conn.connect().unwrap_err();
        assert!(matches!(
            err,
            LinkError::Transport(TransportError::NoMatchingPort)
        ));
        assert!(!conn.is_connected());
    }

    #[test]
    fn explicit_port_skips_discovery() {
        let provider = Arc::new(MockProvider::with_ports(MockWire::new(), Vec::new()));
        let conn = ConnectionManager::new(
            provider,
            SerialConfig {
                port: Some("/dev/ttyCUSTOM".to_string()),
                ..serial()
            },
            ReconnectConfig::default(),
        );
        assert_eq!(conn.connect().unwrap(), "/dev/ttyCUSTOM");
    }

    #[test]
    fn disconnect_disables_reconnect() {
        let provider = Arc::new(MockProvider::new(MockWire::new()));
        let conn = manager(provider);
        conn.connect().unwrap();

        conn.disconnect();
        assert!(!conn.is_connected());
        assert!(!conn.reconnect_enabled());
        assert!(conn.lock_writer().is_none());
        assert!(matches!(
            conn.reconnect(3, Duration::ZERO),
            Err(LinkError::ReconnectDisabled)
        ));
    }

    #[test]
    fn reconnect_retries_until_open_succeeds() {
        let provider = Arc::new(MockProvider::new(MockWire::new()));
        provider.fail_next_opens(2);
        let conn = manager(Arc::clone(&provider));

        conn.reconnect(3, Duration::from_millis(1)).unwrap();
        assert_eq!(provider.opens(), 3);
        let snapshot = conn.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert_eq!(snapshot.last_error, None);
    }

    #[test]
    fn reconnect_gives_up_after_budget() {
        let provider = Arc::new(MockProvider::new(MockWire::new()));
        provider.fail_next_opens(10);
        let conn = manager(Arc::clone(&provider));

        let err = conn.reconnect(3, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, LinkError::ReconnectFailed { attempts: 3 }));
        assert_eq!(provider.opens(), 3);
        let snapshot = conn.snapshot();
        assert_eq!(snapshot.reconnect_attempts, 3);
        assert!(snapshot.last_error.is_some());

        conn.disconnect();
        assert_eq!(conn.snapshot().reconnect_attempts, 0);
    }

    #[test]
    fn disable_interrupts_reconnect_sleep() {
        let provider = Arc::new(MockProvider::new(MockWire::new()));
        provider.fail_next_opens(10);
        let conn = Arc::new(manager(provider));

        let worker = Arc::clone(&conn);
        let started = Instant::now();
        let handle = thread::spawn(move || worker.reconnect(3, Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(50));
        conn.set_reconnect_enabled(false);

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(LinkError::ReconnectDisabled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn disconnect_during_settle_closes_new_port() {
        let provider = Arc::new(MockProvider::new(MockWire::new()));
        let conn = Arc::new(ConnectionManager::new(
            provider,
            SerialConfig {
                settle_delay_ms: 300,
                ..SerialConfig::default()
            },
            ReconnectConfig::default(),
        ));

        let opener = Arc::clone(&conn);
        let handle = thread::spawn(move || opener.connect());
        thread::sleep(Duration::from_millis(100));
        conn.disconnect();

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(LinkError::ReconnectDisabled)));
        assert!(!conn.is_connected());
        assert!(conn.lock_writer().is_none());
        assert!(conn.lock_reader().is_none());
    }

    #[test]
    fn connect_after_disconnect_still_works() {
        let provider = Arc::new(MockProvider::new(MockWire::new()));
        let conn = manager(provider);
        conn.disconnect();

        conn.connect().unwrap();
        assert!(conn.is_connected());
    }

    #[test]
    fn mark_lost_keeps_reconnect_enabled() {
        let provider = Arc::new(MockProvider::new(MockWire::new()));
        let conn = manager(provider);
        conn.connect().unwrap();

        conn.mark_lost("device unplugged");
        assert!(!conn.is_connected());
        assert!(conn.reconnect_enabled());
        assert_eq!(
            conn.snapshot().last_error.as_deref(),
            Some("device unplugged")
        );
    }
}
