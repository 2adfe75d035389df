use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chargelink_frame::{AckFrame, COMMAND_LEN};
use parking_lot::{Condvar, Mutex};
use tracing::warn;

/// A command held back while the link was down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    pub bytes: [u8; COMMAND_LEN],
    pub enqueued_at: Instant,
    pub retry_count: u32,
}

impl QueuedCommand {
    pub fn new(bytes: [u8; COMMAND_LEN]) -> Self {
        Self {
            bytes,
            enqueued_at: Instant::now(),
            retry_count: 0,
        }
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.enqueued_at.elapsed() > max_age
    }
}

/// Bounded FIFO of commands awaiting replay. New entries are refused when
/// full.
#[derive(Debug)]
pub struct OfflineQueue {
    inner: Mutex<VecDeque<QueuedCommand>>,
    capacity: usize,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append `command`. Returns `false` (and drops it) when the queue is full.
    pub fn push(&self, command: QueuedCommand) -> bool {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            warn!(
                capacity = self.capacity,
                bytes = ?command.bytes,
                "offline queue full, dropping command"
            );
            return false;
        }
        queue.push_back(command);
        true
    }

    pub fn pop(&self) -> Option<QueuedCommand> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

/// Bounded hand-off of inbound ACKs from the monitor to command senders.
/// The oldest entry is evicted when full.
#[derive(Debug)]
pub struct AckQueue {
    inner: Mutex<VecDeque<AckFrame>>,
    ready: Condvar,
    capacity: usize,
}

impl AckQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, ack: AckFrame) {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            if let Some(evicted) = queue.pop_front() {
                warn!(
                    command = %evicted.command,
                    status = %evicted.status,
                    "ack queue full, evicting oldest"
                );
            }
        }
        queue.push_back(ack);
        self.ready.notify_one();
    }

    /// Pop the oldest ACK, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AckFrame> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.lock();
        loop {
            if let Some(ack) = queue.pop_front() {
                return Some(ack);
            }
            if self.ready.wait_until(&mut queue, deadline).timed_out() {
                return queue.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
