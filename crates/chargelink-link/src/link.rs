use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use chargelink_frame::{AckFrame, StatusFrame};
use chargelink_transport::{PortProvider, SystemPorts};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::connection::{ConnectionManager, ConnectionSnapshot};
use crate::error::Result;
use crate::inspector::{Incident, StatusInspector};
use crate::monitor::{FrameHandler, MonitorWorker};
use crate::queue::AckQueue;
use crate::sender::CommandSender;
use crate::worker::{WorkerControl, WorkerHandle};

/// Callback for incidents raised by the status inspector.
pub type IncidentHandler = Box<dyn Fn(&Incident) + Send + Sync>;

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, capacity: usize) {
    while buf.len() >= capacity.max(1) {
        buf.pop_front();
    }
    buf.push_back(item);
}

fn newest<T: Clone>(buf: &VecDeque<T>, limit: usize) -> Vec<T> {
    let skip = buf.len().saturating_sub(limit);
    buf.iter().skip(skip).cloned().collect()
}

/// State written by the monitor thread and read by API callers.
/// Each field has its own lock and no path holds two at once.
struct LinkShared {
    last_status: Mutex<Option<StatusFrame>>,
    status_history: Mutex<VecDeque<StatusFrame>>,
    last_ack: Mutex<Option<AckFrame>>,
    ack_history: Mutex<VecDeque<AckFrame>>,
    acks: Arc<AckQueue>,
    inspector: StatusInspector,
    incident_handler: Mutex<Option<IncidentHandler>>,
    status_capacity: usize,
    ack_capacity: usize,
}

impl FrameHandler for LinkShared {
    fn on_status(&self, frame: StatusFrame) {
        for incident in self.inspector.inspect(&frame) {
            warn!(kind = %incident.kind, message = %incident.message, "status incident");
            if let Some(handler) = self.incident_handler.lock().as_ref() {
                handler(&incident);
            }
        }

        push_bounded(
            &mut self.status_history.lock(),
            frame.clone(),
            self.status_capacity,
        );
        *self.last_status.lock() = Some(frame);
    }

    fn on_ack(&self, ack: AckFrame) {
        debug!(command = %ack.command, status = %ack.status, "ack received");
        push_bounded(&mut self.ack_history.lock(), ack.clone(), self.ack_capacity);
        *self.last_ack.lock() = Some(ack.clone());
        self.acks.push(ack);
    }
}

/// Device communication facade: owns the connection, the command sender
/// and the monitor thread.
pub struct DeviceLink {
    config: LinkConfig,
    conn: Arc<ConnectionManager>,
    sender: Arc<CommandSender>,
    shared: Arc<LinkShared>,
    control: Arc<WorkerControl>,
    monitor: Mutex<Option<WorkerHandle>>,
}

impl DeviceLink {
    pub fn new(config: LinkConfig, provider: Arc<dyn PortProvider>) -> Self {
        let conn = Arc::new(ConnectionManager::new(
            provider,
            config.serial.clone(),
            config.reconnect.clone(),
        ));
        let acks = Arc::new(AckQueue::new(config.commands.ack_queue_capacity));
        let sender = Arc::new(CommandSender::new(
            Arc::clone(&conn),
            Arc::clone(&acks),
            config.commands.clone(),
        ));
        let shared = Arc::new(LinkShared {
            last_status: Mutex::new(None),
            status_history: Mutex::new(VecDeque::with_capacity(config.history.status_capacity)),
            last_ack: Mutex::new(None),
            ack_history: Mutex::new(VecDeque::with_capacity(config.history.ack_capacity)),
            acks,
            inspector: StatusInspector::new(config.inspector.clone()),
            incident_handler: Mutex::new(None),
            status_capacity: config.history.status_capacity,
            ack_capacity: config.history.ack_capacity,
        });

        Self {
            config,
            conn,
            sender,
            shared,
            control: Arc::new(WorkerControl::new()),
            monitor: Mutex::new(None),
        }
    }

    /// A link over the host's real serial ports.
    pub fn system(config: LinkConfig) -> Self {
        Self::new(config, Arc::new(SystemPorts))
    }

    /// Connect and start the monitor.
    ///
    /// A failed initial connect is not an error: the monitor keeps retrying
    /// in the background.
    pub fn start(&self) -> Result<()> {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            debug!("device link already started");
            return Ok(());
        }

        self.conn.set_reconnect_enabled(true);
        if let Err(err) = self.conn.connect() {
            warn!(error = %err, "initial connect failed, monitor will retry");
            self.conn.mark_lost(&err.to_string());
        }

        let worker = MonitorWorker::new(
            Arc::clone(&self.conn),
            Arc::clone(&self.sender),
            Arc::clone(&self.shared) as Arc<dyn FrameHandler>,
            Arc::clone(&self.control),
            self.config.monitor.clone(),
            self.config.reconnect.clone(),
        );
        *monitor = Some(worker.spawn()?);
        info!("device link started");
        Ok(())
    }

    /// Stop the monitor and close the port.
    pub fn stop(&self) {
        let handle = self.monitor.lock().take();
        self.conn.disconnect();
        if let Some(handle) = handle {
            if !handle.stop(self.config.monitor.join_timeout()) {
                warn!("monitor thread left running");
            }
            info!("device link stopped");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn connection(&self) -> ConnectionSnapshot {
        self.conn.snapshot()
    }

    /// Latest status frame, or `None` if there is none or it is older than
    /// `max_age`. A capture time in the future counts as fresh.
    pub fn get_status(&self, max_age: Duration) -> Option<StatusFrame> {
        let last = self.shared.last_status.lock();
        let frame = last.as_ref()?;
        match frame.age() {
            Some(age) if age > max_age => None,
            _ => Some(frame.clone()),
        }
    }

    /// Request a status frame and wait up to `timeout` for one captured
    /// after the request.
    pub fn get_status_sync(&self, timeout: Duration) -> Option<StatusFrame> {
        let requested_at = SystemTime::now();
        if let Err(err) = self.sender.send_status_request() {
            debug!(error = %err, "status request not sent");
        }

        let poll = Duration::from_millis(self.config.history.sync_poll_interval_ms.max(1));
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.shared.last_status.lock().as_ref() {
                if frame.captured_at() >= requested_at {
                    return Some(frame.clone());
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            thread::sleep(poll.min(remaining));
        }
    }

    pub fn send_authorization(&self) -> bool {
        self.report("authorization", self.sender.send_authorization())
    }

    pub fn send_current_set(&self, amperage: i64) -> bool {
        self.report("current set", self.sender.send_current_set(amperage))
    }

    pub fn send_charge_stop(&self) -> bool {
        self.report("charge stop", self.sender.send_charge_stop())
    }

    pub fn send_status_request(&self) -> bool {
        self.report("status request", self.sender.send_status_request())
    }

    /// Up to `limit` most recent status frames, oldest first.
    pub fn get_status_history(&self, limit: usize) -> Vec<StatusFrame> {
        newest(&self.shared.status_history.lock(), limit)
    }

    /// Up to `limit` most recent ACKs, oldest first.
    pub fn get_ack_history(&self, limit: usize) -> Vec<AckFrame> {
        newest(&self.shared.ack_history.lock(), limit)
    }

    pub fn last_ack(&self) -> Option<AckFrame> {
        self.shared.last_ack.lock().clone()
    }

    pub fn queued_commands(&self) -> usize {
        self.sender.queued_commands()
    }

    pub fn set_incident_handler<F>(&self, handler: F)
    where
        F: Fn(&Incident) + Send + Sync + 'static,
    {
        *self.shared.incident_handler.lock() = Some(Box::new(handler));
    }

    /// Feed one raw line through the same path as port input.
    pub fn ingest_line(&self, line: &str) {
        self.shared.dispatch(line);
    }

    pub fn sender(&self) -> &CommandSender {
        &self.sender
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn report(&self, what: &str, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(command = what, error = %err, "command failed");
                false
            }
        }
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        if self.monitor.get_mut().is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use chargelink_transport::testing::{MockProvider, MockWire};

    use super::*;

    fn offline_link() -> DeviceLink {
        DeviceLink::new(
            LinkConfig::default(),
            Arc::new(MockProvider::new(MockWire::new())),
        )
    }

    #[test]
    fn history_keeps_newest_fifty() {
        let link = offline_link();
        for n in 0..60 {
            link.ingest_line(&format!("<STAT;STATE=2;SEQ={n};>"));
        }

        let history = link.get_status_history(100);
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].get("SEQ").unwrap().as_i64(), Some(10));
        assert_eq!(history[49].get("SEQ").unwrap().as_i64(), Some(59));

        let tail = link.get_status_history(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[2].get("SEQ").unwrap().as_i64(), Some(59));
    }

    #[test]
    fn ack_history_is_bounded() {
        let link = offline_link();
        for _ in 0..40 {
            link.ingest_line("<ACK;CMD=AUTH;STATUS=OK;>");
        }
        assert_eq!(link.get_ack_history(100).len(), 30);
        assert_eq!(link.last_ack().unwrap().command, "AUTH");
    }

    #[test]
    fn stale_status_is_hidden() {
        let link = offline_link();
        link.ingest_line("<STAT;STATE=5;>");
        assert!(link.get_status(Duration::from_secs(5)).is_some());

        let old = link
            .get_status(Duration::from_secs(5))
            .unwrap()
            .with_captured_at(SystemTime::now() - Duration::from_secs(6));
        *link.shared.last_status.lock() = Some(old);
        assert!(link.get_status(Duration::from_secs(5)).is_none());
    }

    #[test]
    fn future_capture_time_counts_as_fresh() {
        let link = offline_link();
        link.ingest_line("<STAT;STATE=5;>");
        let future = link
            .get_status(Duration::from_secs(5))
            .unwrap()
            .with_captured_at(SystemTime::now() + Duration::from_secs(3600));
        *link.shared.last_status.lock() = Some(future);
        assert!(link.get_status(Duration::from_secs(5)).is_some());
    }

    #[test]
    fn no_status_yet() {
        let link = offline_link();
        assert!(link.get_status(Duration::from_secs(5)).is_none());
        assert!(link.last_ack().is_none());
    }

    #[test]
    fn incidents_reach_handler() {
        let link = offline_link();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        link.set_incident_handler(move |incident| sink.lock().push(incident.kind));

        link.ingest_line("<STAT;STATE=5;NOTE=EXTERNAL power fault;>");
        assert_eq!(seen.lock().len(), 1);
    }
}
