use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chargelink_frame::{
    authorize, charge_stop, set_current, status_request, validate_command, write_command,
    FrameError, Opcode, COMMAND_LEN, MAX_AMPERAGE, MIN_AMPERAGE,
};
use chargelink_transport::{classify_io_error, IoFailure};
use tracing::{debug, info, warn};

use crate::backoff::exponential_delay;
use crate::config::CommandConfig;
use crate::connection::ConnectionManager;
use crate::error::{LinkError, Result};
use crate::queue::{AckQueue, OfflineQueue, QueuedCommand};

/// How a command is confirmed by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPolicy {
    /// `CMD` value of the acknowledgement that answers this command.
    pub expected: &'static str,
    /// `STATUS` values that count as success. Anything else is a rejection.
    pub accepted: &'static [&'static str],
    pub wait_for_ack: bool,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Queue the command for replay when no write attempt succeeded.
    pub queue_if_unsent: bool,
}

impl AckPolicy {
    pub fn authorization(config: &CommandConfig) -> Self {
        Self {
            expected: Opcode::Authorize.ack_name(),
            accepted: &["OK", "CLEARED"],
            wait_for_ack: true,
            timeout: Duration::from_millis(config.auth_ack_timeout_ms),
            max_retries: config.auth_max_retries,
            queue_if_unsent: true,
        }
    }

    pub fn current_set(config: &CommandConfig) -> Self {
        Self {
            expected: Opcode::SetCurrent.ack_name(),
            accepted: &["OK"],
            wait_for_ack: true,
            timeout: Duration::from_millis(config.current_ack_timeout_ms),
            max_retries: config.current_max_retries,
            queue_if_unsent: true,
        }
    }

    pub fn charge_stop(config: &CommandConfig) -> Self {
        Self {
            expected: Opcode::Stop.ack_name(),
            accepted: &["OK"],
            wait_for_ack: config.stop_wait_for_ack,
            timeout: Duration::from_millis(config.stop_ack_timeout_ms),
            max_retries: config.stop_max_retries,
            queue_if_unsent: true,
        }
    }

    pub fn status_request() -> Self {
        Self {
            expected: Opcode::Status.ack_name(),
            accepted: &["OK"],
            wait_for_ack: false,
            timeout: Duration::ZERO,
            max_retries: 0,
            queue_if_unsent: false,
        }
    }
}

/// Result of one offline replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub sent: usize,
    pub requeued: usize,
    pub dropped: usize,
}

enum AckWait {
    Accepted,
    Rejected(String),
    TimedOut,
}

/// Serialized command writes, ACK correlation and the offline queue.
///
/// ACKs are matched by `CMD` name only. An ACK belonging to an earlier,
/// already timed-out command with the same name can satisfy a later wait.
pub struct CommandSender {
    conn: Arc<ConnectionManager>,
    acks: Arc<AckQueue>,
    offline: OfflineQueue,
    config: CommandConfig,
}

impl CommandSender {
    pub fn new(conn: Arc<ConnectionManager>, acks: Arc<AckQueue>, config: CommandConfig) -> Self {
        Self {
            conn,
            acks,
            offline: OfflineQueue::new(config.offline_queue_capacity),
            config,
        }
    }

    /// Write one command frame under the write lock.
    ///
    /// The link is checked before taking the lock, again once it is held, and
    /// once more after the write. When any check finds the link down (or the
    /// write itself fails) the command is queued for replay if
    /// `queue_if_failed` is set.
    pub fn send_command_bytes(&self, bytes: &[u8], queue_if_failed: bool) -> Result<()> {
        let frame = validate_command(bytes)?;

        if !self.conn.is_connected() {
            return self.not_sent(frame, queue_if_failed, LinkError::NotConnected);
        }

        let written = {
            let mut writer = self.conn.lock_writer();
            match writer.as_mut() {
                Some(port) if self.conn.is_connected() => {
                    Some(write_command(port.as_mut(), &frame))
                }
                _ => None,
            }
        };
        let Some(written) = written else {
            return self.not_sent(frame, queue_if_failed, LinkError::NotConnected);
        };

        match written {
            Ok(()) if self.conn.is_connected() => {
                debug!(bytes = ?frame, "command written");
                Ok(())
            }
            Ok(()) => {
                warn!(bytes = ?frame, "link dropped right after write");
                self.not_sent(frame, queue_if_failed, LinkError::NotConnected)
            }
            Err(FrameError::Io(err)) => {
                let lost = matches!(classify_io_error(&err), IoFailure::DeviceLost);
                if lost {
                    self.conn.mark_lost(&err.to_string());
                }
                warn!(error = %err, device_lost = lost, "command write failed");
                self.not_sent(frame, queue_if_failed, FrameError::Io(err).into())
            }
            Err(FrameError::ConnectionClosed) => {
                self.conn.mark_lost("port closed during write");
                self.not_sent(
                    frame,
                    queue_if_failed,
                    FrameError::ConnectionClosed.into(),
                )
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Send a command and wait for its acknowledgement per `policy`.
    ///
    /// Timeouts and failed writes are retried with exponential backoff. An
    /// acknowledgement outside `policy.accepted` ends the call at once. If
    /// every write attempt failed the command is queued for replay when the
    /// policy allows it.
    pub fn send_with_ack(&self, bytes: &[u8], policy: &AckPolicy) -> Result<()> {
        let frame = validate_command(bytes)?;
        let attempts = policy.max_retries + 1;

        let mut last_send_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                thread::sleep(exponential_delay(
                    self.config.retry_base_delay(),
                    attempt - 1,
                    self.config.retry_max_delay(),
                ));
            }

            if let Err(err) = self.send_command_bytes(&frame, false) {
                debug!(command = policy.expected, attempt = attempt + 1, error = %err, "send attempt failed");
                last_send_error = Some(err);
                continue;
            }
            last_send_error = None;

            if !policy.wait_for_ack {
                return Ok(());
            }

            match self.await_ack(policy) {
                AckWait::Accepted => {
                    info!(command = policy.expected, attempt = attempt + 1, "command acknowledged");
                    return Ok(());
                }
                AckWait::Rejected(status) => {
                    warn!(command = policy.expected, status = %status, "command rejected");
                    return Err(LinkError::AckRejected {
                        command: policy.expected.to_string(),
                        status,
                    });
                }
                AckWait::TimedOut => {
                    warn!(
                        command = policy.expected,
                        attempt = attempt + 1,
                        attempts,
                        timeout = ?policy.timeout,
                        "no acknowledgement"
                    );
                }
            }
        }

        match last_send_error {
            Some(err) => {
                if policy.queue_if_unsent {
                    self.enqueue(frame);
                }
                Err(err)
            }
            None => Err(LinkError::AckTimeout {
                command: policy.expected.to_string(),
                attempts,
            }),
        }
    }

    pub fn send_authorization(&self) -> Result<()> {
        self.send_with_ack(&authorize(), &AckPolicy::authorization(&self.config))
    }

    /// Set the charging current. Values outside 6..=32 A never reach the wire.
    pub fn send_current_set(&self, amperage: i64) -> Result<()> {
        let amps = u8::try_from(amperage)
            .ok()
            .filter(|amps| (MIN_AMPERAGE..=MAX_AMPERAGE).contains(amps))
            .ok_or(LinkError::InvalidAmperage(amperage))?;
        let frame = set_current(amps)?;
        self.send_with_ack(&frame, &AckPolicy::current_set(&self.config))
    }

    pub fn send_charge_stop(&self) -> Result<()> {
        self.send_with_ack(&charge_stop(), &AckPolicy::charge_stop(&self.config))
    }

    pub fn send_status_request(&self) -> Result<()> {
        self.send_with_ack(&status_request(), &AckPolicy::status_request())
    }

    /// Resend up to one batch of queued commands.
    ///
    /// Stale entries are dropped unsent; entries that fail again are requeued
    /// until they exhaust their retry budget.
    pub fn process_command_queue(&self) -> ReplayStats {
        let mut stats = ReplayStats::default();
        let batch = self.offline.len().min(self.config.replay_batch);
        let max_age = self.config.offline_max_age();

        for _ in 0..batch {
            let Some(mut command) = self.offline.pop() else {
                break;
            };
            if command.is_stale(max_age) {
                warn!(bytes = ?command.bytes, age = ?command.enqueued_at.elapsed(), "dropping stale queued command");
                stats.dropped += 1;
                continue;
            }
            match self.send_command_bytes(&command.bytes, false) {
                Ok(()) => stats.sent += 1,
                Err(err) => {
                    command.retry_count += 1;
                    if command.retry_count >= self.config.replay_max_retries {
                        warn!(bytes = ?command.bytes, retries = command.retry_count, error = %err, "giving up on queued command");
                        stats.dropped += 1;
                    } else if self.offline.push(command) {
                        stats.requeued += 1;
                    } else {
                        stats.dropped += 1;
                    }
                }
            }
        }

        if stats != ReplayStats::default() {
            info!(
                sent = stats.sent,
                requeued = stats.requeued,
                dropped = stats.dropped,
                remaining = self.offline.len(),
                "replayed offline commands"
            );
        }
        stats
    }

    pub fn queued_commands(&self) -> usize {
        self.offline.len()
    }

    pub fn has_queued_commands(&self) -> bool {
        !self.offline.is_empty()
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    fn not_sent(&self, frame: [u8; COMMAND_LEN], queue: bool, err: LinkError) -> Result<()> {
        if queue {
            self.enqueue(frame);
        }
        Err(err)
    }

    fn enqueue(&self, frame: [u8; COMMAND_LEN]) {
        if self.offline.push(QueuedCommand::new(frame)) {
            debug!(bytes = ?frame, queued = self.offline.len(), "command queued for replay");
        }
    }

    fn await_ack(&self, policy: &AckPolicy) -> AckWait {
        let deadline = Instant::now() + policy.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return AckWait::TimedOut;
            }
            let wait = remaining.min(self.config.ack_poll_interval());
            let Some(ack) = self.acks.pop_timeout(wait) else {
                continue;
            };
            if !ack.command.eq_ignore_ascii_case(policy.expected) {
                debug!(
                    expected = policy.expected,
                    got = %ack.command,
                    status = %ack.status,
                    "discarding unrelated ack"
                );
                continue;
            }
            if ack.status_is_any(policy.accepted) {
                return AckWait::Accepted;
            }
            return AckWait::Rejected(ack.status);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::SystemTime;

    use chargelink_frame::AckFrame;
    use chargelink_transport::testing::{MockFault, MockProvider, MockWire};

    use super::*;
    use crate::config::{ReconnectConfig, SerialConfig};

    struct Fixture {
        wire: MockWire,
        conn: Arc<ConnectionManager>,
        acks: Arc<AckQueue>,
        sender: CommandSender,
    }

    fn fixture(config: CommandConfig) -> Fixture {
        let wire = MockWire::new();
        let provider = Arc::new(MockProvider::new(wire.clone()));
        let conn = Arc::new(ConnectionManager::new(
            provider,
            SerialConfig {
                settle_delay_ms: 0,
                ..SerialConfig::default()
            },
            ReconnectConfig::default(),
        ));
        let acks = Arc::new(AckQueue::new(config.ack_queue_capacity));
        let sender = CommandSender::new(Arc::clone(&conn), Arc::clone(&acks), config);
        Fixture {
            wire,
            conn,
            acks,
            sender,
        }
    }

    fn fast() -> CommandConfig {
        CommandConfig {
            auth_ack_timeout_ms: 60,
            current_ack_timeout_ms: 60,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            ack_poll_interval_ms: 5,
            ..CommandConfig::default()
        }
    }

    fn ack(command: &str, status: &str) -> AckFrame {
        AckFrame {
            command: command.to_string(),
            status: status.to_string(),
            fields: BTreeMap::new(),
            received_at: SystemTime::now(),
        }
    }

    #[test]
    fn writes_frame_when_connected() {
        let fx = fixture(fast());
        fx.conn.connect().unwrap();

        fx.sender.send_command_bytes(&authorize(), true).unwrap();
        assert_eq!(fx.wire.written_frames(), vec![authorize()]);
        assert_eq!(fx.sender.queued_commands(), 0);
    }

    #[test]
    fn queues_when_disconnected() {
        let fx = fixture(fast());

        let err = fx.sender.send_command_bytes(&charge_stop(), true).unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
        assert_eq!(fx.sender.queued_commands(), 1);

        let err = fx.sender.send_command_bytes(&charge_stop(), false).unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
        assert_eq!(fx.sender.queued_commands(), 1);
    }

    #[test]
    fn wrong_length_is_never_queued() {
        let fx = fixture(fast());
        let err = fx.sender.send_command_bytes(&[0x41, 0x01], true).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Frame(FrameError::InvalidCommandLength { len: 2 })
        ));
        assert_eq!(fx.sender.queued_commands(), 0);
    }

    #[test]
    fn device_lost_on_write_marks_link_down_and_queues() {
        let fx = fixture(fast());
        fx.conn.connect().unwrap();
        fx.wire
            .fail_next_write(MockFault::Kind(std::io::ErrorKind::BrokenPipe));

        assert!(fx.sender.send_command_bytes(&authorize(), true).is_err());
        assert!(!fx.conn.is_connected());
        assert_eq!(fx.sender.queued_commands(), 1);
    }

    #[test]
    fn cleared_auth_ack_is_success() {
        let fx = fixture(fast());
        fx.conn.connect().unwrap();
        fx.acks.push(ack("AUTH", "CLEARED"));

        fx.sender.send_authorization().unwrap();
        assert_eq!(fx.wire.written_frames(), vec![authorize()]);
    }

    #[test]
    fn adverse_status_is_not_retried() {
        let fx = fixture(fast());
        fx.conn.connect().unwrap();
        fx.acks.push(ack("AUTH", "NOT CLEARED"));

        let err = fx.sender.send_authorization().unwrap_err();
        assert!(matches!(err, LinkError::AckRejected { ref status, .. } if status == "NOT CLEARED"));
        assert_eq!(fx.wire.written_frames().len(), 1);
    }

    #[test]
    fn current_err_is_rejected_without_retry() {
        let fx = fixture(fast());
        fx.conn.connect().unwrap();
        fx.acks.push(ack("CURRENT", "ERR"));

        let err = fx.sender.send_current_set(16).unwrap_err();
        assert!(matches!(
            err,
            LinkError::AckRejected { ref command, ref status } if command == "CURRENT" && status == "ERR"
        ));
        assert_eq!(fx.wire.written_frames(), vec![set_current(16).unwrap()]);
        assert_eq!(fx.sender.queued_commands(), 0);
    }

    #[test]
    fn failed_write_is_retried_after_backoff() {
        let fx = fixture(CommandConfig {
            retry_base_delay_ms: 40,
            ..fast()
        });
        fx.conn.connect().unwrap();
        fx.wire
            .fail_next_write(MockFault::Kind(std::io::ErrorKind::Other));
        fx.acks.push(ack("CURRENT", "OK"));

        let started = Instant::now();
        fx.sender.send_current_set(20).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert!(fx.conn.is_connected());
        assert_eq!(fx.wire.written_frames(), vec![set_current(20).unwrap()]);
        assert_eq!(fx.sender.queued_commands(), 0);
    }

    #[test]
    fn unsendable_command_backs_off_then_queues_once() {
        let fx = fixture(CommandConfig {
            retry_base_delay_ms: 20,
            retry_max_delay_ms: 1_000,
            ..fast()
        });
        fx.conn.connect().unwrap();
        fx.wire
            .fail_next_write(MockFault::Kind(std::io::ErrorKind::BrokenPipe));

        let started = Instant::now();
        let err = fx.sender.send_authorization().unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
        // Three attempts with 20ms and 40ms pauses between them.
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(fx.wire.written().is_empty());
        assert_eq!(fx.sender.queued_commands(), 1);
    }

    #[test]
    fn timeout_retries_then_fails() {
        let fx = fixture(fast());
        fx.conn.connect().unwrap();

        let err = fx.sender.send_authorization().unwrap_err();
        assert!(matches!(err, LinkError::AckTimeout { attempts: 3, .. }));
        assert_eq!(fx.wire.written_frames().len(), 3);
        assert_eq!(fx.sender.queued_commands(), 0);
    }

    #[test]
    fn unrelated_acks_are_skipped() {
        let fx = fixture(fast());
        fx.conn.connect().unwrap();
        fx.acks.push(ack("AUTH", "OK"));
        fx.acks.push(ack("CURRENT", "OK"));

        fx.sender.send_current_set(16).unwrap();
        assert!(fx.acks.is_empty());
    }

    #[test]
    fn amperage_is_validated_before_io() {
        let fx = fixture(fast());
        fx.conn.connect().unwrap();

        for amps in [-1, 0, 5, 33, 255, 1000] {
            let err = fx.sender.send_current_set(amps).unwrap_err();
            assert!(matches!(err, LinkError::InvalidAmperage(a) if a == amps));
        }
        assert!(fx.wire.written().is_empty());
    }

    #[test]
    fn stop_and_status_do_not_wait() {
        let fx = fixture(fast());
        fx.conn.connect().unwrap();

        fx.sender.send_charge_stop().unwrap();
        fx.sender.send_status_request().unwrap();
        assert_eq!(fx.wire.written_frames(), vec![charge_stop(), status_request()]);
    }

    #[test]
    fn failed_sends_are_queued_once() {
        let fx = fixture(fast());

        let err = fx.sender.send_authorization().unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
        assert_eq!(fx.sender.queued_commands(), 1);

        fx.sender.send_status_request().unwrap_err();
        assert_eq!(fx.sender.queued_commands(), 1);
    }

    #[test]
    fn replay_sends_in_fifo_order() {
        let fx = fixture(fast());
        fx.sender.send_command_bytes(&authorize(), true).unwrap_err();
        fx.sender.send_command_bytes(&charge_stop(), true).unwrap_err();
        fx.conn.connect().unwrap();

        let stats = fx.sender.process_command_queue();
        assert_eq!(stats.sent, 2);
        assert_eq!(fx.wire.written_frames(), vec![authorize(), charge_stop()]);
        assert_eq!(fx.sender.queued_commands(), 0);
    }

    #[test]
    fn replay_drops_stale_entries() {
        let fx = fixture(fast());
        let mut stale = QueuedCommand::new(authorize());
        stale.enqueued_at = Instant::now() - Duration::from_secs(11);
        fx.sender.offline.push(stale);
        fx.sender.offline.push(QueuedCommand::new(charge_stop()));
        fx.conn.connect().unwrap();

        let stats = fx.sender.process_command_queue();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.sent, 1);
        assert_eq!(fx.wire.written_frames(), vec![charge_stop()]);
    }

    #[test]
    fn replay_limits_batch_size() {
        let fx = fixture(fast());
        for _ in 0..15 {
            fx.sender.offline.push(QueuedCommand::new(status_request()));
        }
        fx.conn.connect().unwrap();

        let stats = fx.sender.process_command_queue();
        assert_eq!(stats.sent, 10);
        assert_eq!(fx.sender.queued_commands(), 5);
    }

    #[test]
    fn replay_gives_up_after_retry_budget() {
        let fx = fixture(fast());
        fx.sender.offline.push(QueuedCommand::new(authorize()));

        for _ in 0..2 {
            let stats = fx.sender.process_command_queue();
            assert_eq!(stats.requeued, 1);
        }
        let stats = fx.sender.process_command_queue();
        assert_eq!(stats.dropped, 1);
        assert_eq!(fx.sender.queued_commands(), 0);
    }
}
