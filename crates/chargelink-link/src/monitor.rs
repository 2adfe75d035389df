use std::sync::Arc;
use std::time::Duration;

use chargelink_frame::{
    classify_line, decode_ack, decode_status, AckFrame, FrameError, LineKind, LineReader,
    StatusFrame,
};
use chargelink_transport::{classify_io_error, IoFailure, Port};
use tracing::{debug, info, trace, warn};

use crate::backoff::escalation_delay;
use crate::config::{MonitorConfig, ReconnectConfig};
use crate::connection::ConnectionManager;
use crate::error::{LinkError, Result};
use crate::sender::CommandSender;
use crate::worker::{WorkerControl, WorkerHandle};

/// Receives every frame the monitor decodes, on the monitor thread.
pub trait FrameHandler: Send + Sync {
    fn on_status(&self, frame: StatusFrame);
    fn on_ack(&self, ack: AckFrame);

    /// Decode one raw line and route it to `on_status` or `on_ack`.
    fn dispatch(&self, line: &str) {
        match classify_line(line) {
            LineKind::Status => match decode_status(line) {
                Some(frame) => self.on_status(frame),
                None => debug!(line, "dropping malformed status frame"),
            },
            LineKind::Ack => match decode_ack(line) {
                Some(ack) => self.on_ack(ack),
                None => debug!(line, "dropping malformed ack frame"),
            },
            LineKind::Other => trace!(line, "ignoring non-frame line"),
        }
    }
}

/// What a single monitor tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Lines were handled while connected.
    Read { lines: usize, discarded: usize },
    /// Connected, nothing actionable this tick.
    Quiet,
    /// The read path found the device gone.
    LinkLost,
    Reconnected,
    ReconnectFailed { failures: u32 },
    /// Slept out an escalated wait without trying to reconnect.
    BackedOff(Duration),
    /// Disconnected and reconnection is switched off.
    Disabled,
}

enum ReadFailure {
    DeviceLost(String),
    Transient(String),
}

/// Background reader: pulls telemetry and ACKs off the port, drains the
/// offline queue, and drives reconnection while the link is down.
pub struct MonitorWorker {
    conn: Arc<ConnectionManager>,
    sender: Arc<CommandSender>,
    handler: Arc<dyn FrameHandler>,
    control: Arc<WorkerControl>,
    config: MonitorConfig,
    reconnect: ReconnectConfig,
    reader: LineReader,
    failures: u32,
}

impl MonitorWorker {
    pub fn new(
        conn: Arc<ConnectionManager>,
        sender: Arc<CommandSender>,
        handler: Arc<dyn FrameHandler>,
        control: Arc<WorkerControl>,
        config: MonitorConfig,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            conn,
            sender,
            handler,
            control,
            config,
            reconnect,
            reader: LineReader::new(),
            failures: 0,
        }
    }

    /// Start the loop on its own thread. `control` must be idle.
    pub fn spawn(self) -> Result<WorkerHandle> {
        let control = Arc::clone(&self.control);
        if !control.try_start() {
            return Err(LinkError::Spawn {
                name: "monitor",
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "monitor already running",
                ),
            });
        }
        WorkerHandle::spawn("chargelink-monitor", control, move || self.run()).map_err(
            |source| LinkError::Spawn {
                name: "monitor",
                source,
            },
        )
    }

    pub fn run(mut self) {
        debug!(tick = ?self.config.tick(), "monitor started");
        while self.control.is_running() {
            self.tick();
            if !self.control.sleep(self.config.tick()) {
                break;
            }
        }
        debug!("monitor stopping");
    }

    /// Run one iteration of the loop.
    pub fn tick(&mut self) -> TickOutcome {
        if self.conn.is_connected() {
            self.poll_connected()
        } else {
            self.poll_disconnected()
        }
    }

    /// Consecutive failed reconnect rounds.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn poll_connected(&mut self) -> TickOutcome {
        let (lines, discarded) = match self.read_lines() {
            Ok(read) => read,
            Err(ReadFailure::DeviceLost(reason)) => {
                self.conn.mark_lost(&reason);
                self.reader.clear();
                return TickOutcome::LinkLost;
            }
            Err(ReadFailure::Transient(reason)) => {
                debug!(reason, "transient read error");
                return TickOutcome::Quiet;
            }
        };

        let handled = lines.len();
        for line in lines {
            self.handler.dispatch(&line);
        }

        if self.sender.has_queued_commands() {
            self.sender.process_command_queue();
        }

        if handled == 0 && discarded == 0 {
            TickOutcome::Quiet
        } else {
            TickOutcome::Read {
                lines: handled,
                discarded,
            }
        }
    }

    fn poll_disconnected(&mut self) -> TickOutcome {
        if !self.conn.reconnect_enabled() {
            return TickOutcome::Disabled;
        }

        if let Some(wait) = escalation_delay(
            self.failures,
            self.reconnect.escalation_threshold,
            self.reconnect.escalation_base(),
            self.reconnect.escalation_cap(),
        ) {
            warn!(failures = self.failures, ?wait, "reconnect keeps failing, backing off");
            if !self.control.sleep(wait) {
                return TickOutcome::BackedOff(wait);
            }
        }

        match self
            .conn
            .reconnect(self.reconnect.max_retries, self.reconnect.initial_delay())
        {
            Ok(()) => {
                self.failures = 0;
                self.reader.clear();
                info!("link restored");
                if self.sender.has_queued_commands() {
                    self.sender.process_command_queue();
                }
                TickOutcome::Reconnected
            }
            Err(LinkError::ReconnectDisabled) => TickOutcome::Disabled,
            Err(err) => {
                self.failures = self.failures.saturating_add(1);
                warn!(failures = self.failures, error = %err, "reconnect round failed");
                TickOutcome::ReconnectFailed {
                    failures: self.failures,
                }
            }
        }
    }

    /// Pull pending bytes and split off up to `max_lines_per_tick` lines plus
    /// one more. Anything left over after that is discarded so telemetry never
    /// lags behind the controller.
    fn read_lines(&mut self) -> std::result::Result<(Vec<String>, usize), ReadFailure> {
        let mut guard = self.conn.lock_reader();
        let Some(port) = guard.as_mut() else {
            return Ok((Vec::new(), 0));
        };

        fill_pending(&mut self.reader, port.as_mut())?;

        let max_lines = self.config.max_lines_per_tick;
        let mut lines = Vec::with_capacity(max_lines + 1);
        while lines.len() < max_lines {
            match self.reader.next_line() {
                Some(line) => lines.push(line),
                None => break,
            }
        }

        let mut discarded = 0;
        if lines.len() == max_lines && self.reader.buffered() > 0 {
            if let Some(line) = self.reader.next_line() {
                lines.push(line);
            }
            let pending = port.bytes_to_read().map_err(io_failure)? as usize;
            discarded = self.reader.clear() + pending;
            port.discard_input().map_err(io_failure)?;
            if discarded > 0 {
                debug!(bytes = discarded, "discarding status backlog");
            }
        }
        Ok((lines, discarded))
    }
}

fn fill_pending(
    reader: &mut LineReader,
    port: &mut dyn Port,
) -> std::result::Result<(), ReadFailure> {
    let pending = port.bytes_to_read().map_err(io_failure)? as usize;
    if pending == 0 {
        return Ok(());
    }
    match reader.fill_from(port, pending) {
        Ok(_) => Ok(()),
        Err(FrameError::Io(err)) => Err(io_failure(err)),
        Err(FrameError::ConnectionClosed) => {
            Err(ReadFailure::DeviceLost("port closed".to_string()))
        }
        Err(err) => Err(ReadFailure::Transient(err.to_string())),
    }
}

fn io_failure(err: std::io::Error) -> ReadFailure {
    match classify_io_error(&err) {
        IoFailure::DeviceLost => ReadFailure::DeviceLost(err.to_string()),
        IoFailure::Timeout => ReadFailure::Transient(format!("timeout: {err}")),
        IoFailure::Other => {
            warn!(error = %err, "unexpected read error");
            ReadFailure::Transient(err.to_string())
        }
    }
}
