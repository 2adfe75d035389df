//! In-memory port for exercising the link layer without hardware.
//!
//! A [`MockWire`] is the shared state behind every handle opened from a
//! [`MockProvider`]. Tests push controller output into it, inspect what the
//! host wrote, inject faults, and can install a responder that answers
//! written commands the way the controller firmware would.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, TransportError};
use crate::traits::{Port, PortDescriptor, PortKind, PortProvider, PortSettings};

type Responder = Box<dyn FnMut(&[u8]) -> Option<String> + Send>;

#[derive(Default)]
struct WireState {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    read_fault: Option<MockFault>,
    write_fault: Option<MockFault>,
    unplugged: bool,
    discarded: usize,
    responder: Option<Responder>,
}

/// An injectable I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    Kind(io::ErrorKind),
    #[cfg(unix)]
    Os(i32),
}

impl MockFault {
    fn to_error(self) -> io::Error {
        match self {
            MockFault::Kind(kind) => io::Error::from(kind),
            #[cfg(unix)]
            MockFault::Os(code) => io::Error::from_raw_os_error(code),
        }
    }
}

/// Shared handle onto the simulated device.
#[derive(Clone, Default)]
pub struct MockWire {
    state: Arc<Mutex<WireState>>,
}

impl MockWire {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a newline-terminated line as controller output.
    pub fn push_line(&self, line: &str) {
        let mut state = self.state.lock();
        state.inbound.extend(line.as_bytes());
        state.inbound.push_back(b'\n');
    }

    /// Queue raw bytes as controller output.
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend(bytes);
    }

    /// Everything the host has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Written bytes split into 5-byte command frames.
    pub fn written_frames(&self) -> Vec<[u8; 5]> {
        self.state
            .lock()
            .written
            .chunks_exact(5)
            .map(|chunk| [chunk[0], chunk[1], chunk[2], chunk[3], chunk[4]])
            .collect()
    }

    /// Bytes still waiting to be read by the host.
    pub fn pending_inbound(&self) -> usize {
        self.state.lock().inbound.len()
    }

    /// Bytes dropped through [`Port::discard_input`].
    pub fn discarded(&self) -> usize {
        self.state.lock().discarded
    }

    /// Fail the next read (or `bytes_to_read`) with `fault`.
    pub fn fail_next_read(&self, fault: MockFault) {
        self.state.lock().read_fault = Some(fault);
    }

    /// Fail the next write with `fault`.
    pub fn fail_next_write(&self, fault: MockFault) {
        self.state.lock().write_fault = Some(fault);
    }

    /// Simulate pulling the cable: I/O fails and opens are refused.
    pub fn unplug(&self) {
        self.state.lock().unplugged = true;
    }

    /// Undo [`MockWire::unplug`].
    pub fn replug(&self) {
        self.state.lock().unplugged = false;
    }

    pub fn is_unplugged(&self) -> bool {
        self.state.lock().unplugged
    }

    /// Answer each write with the returned line, if any.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<String> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }
}

fn unplugged_error() -> io::Error {
    #[cfg(unix)]
    {
        io::Error::from_raw_os_error(libc::EIO)
    }
    #[cfg(not(unix))]
    {
        io::Error::from(io::ErrorKind::BrokenPipe)
    }
}

/// One open handle onto a [`MockWire`].
pub struct MockPort {
    wire: MockWire,
    name: String,
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.wire.state.lock();
        if state.unplugged {
            return Err(unplugged_error());
        }
        if let Some(fault) = state.read_fault.take() {
            return Err(fault.to_error());
        }
        if state.inbound.is_empty() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.wire.state.lock();
        if state.unplugged {
            return Err(unplugged_error());
        }
        if let Some(fault) = state.write_fault.take() {
            return Err(fault.to_error());
        }
        state.written.extend_from_slice(buf);
        let reply = state.responder.as_mut().and_then(|respond| respond(buf));
        if let Some(line) = reply {
            state.inbound.extend(line.as_bytes());
            state.inbound.push_back(b'\n');
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.wire.state.lock().unplugged {
            return Err(unplugged_error());
        }
        Ok(())
    }
}

impl Port for MockPort {
    fn bytes_to_read(&self) -> io::Result<u32> {
        let mut state = self.wire.state.lock();
        if state.unplugged {
            return Err(unplugged_error());
        }
        if let Some(fault) = state.read_fault.take() {
            return Err(fault.to_error());
        }
        Ok(state.inbound.len() as u32)
    }

    fn discard_input(&self) -> io::Result<()> {
        let mut state = self.wire.state.lock();
        state.discarded += state.inbound.len();
        state.inbound.clear();
        Ok(())
    }

    fn try_clone_port(&self) -> io::Result<Box<dyn Port>> {
        Ok(Box::new(MockPort {
            wire: self.wire.clone(),
            name: self.name.clone(),
        }))
    }

    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

/// A [`PortProvider`] whose every port is backed by one [`MockWire`].
pub struct MockProvider {
    ports: Vec<PortDescriptor>,
    wire: MockWire,
    opens: AtomicUsize,
    failing_opens: AtomicUsize,
}

impl MockProvider {
    /// A provider exposing a single USB port named `/dev/ttyMOCK0`.
    pub fn new(wire: MockWire) -> Self {
        Self::with_ports(
            wire,
            vec![PortDescriptor {
                name: "/dev/ttyMOCK0".to_string(),
                kind: PortKind::Usb,
                manufacturer: Some("QinHeng".to_string()),
                product: Some("CH340 serial converter".to_string()),
            }],
        )
    }

    pub fn with_ports(wire: MockWire, ports: Vec<PortDescriptor>) -> Self {
        Self {
            ports,
            wire,
            opens: AtomicUsize::new(0),
            failing_opens: AtomicUsize::new(0),
        }
    }

    /// Refuse the next `count` open attempts.
    pub fn fail_next_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Number of open attempts, successful or not.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn wire(&self) -> &MockWire {
        &self.wire
    }
}

impl PortProvider for MockProvider {
    fn list(&self) -> Result<Vec<PortDescriptor>> {
        Ok(self.ports.clone())
    }

    fn open(&self, name: &str, _settings: &PortSettings) -> Result<Box<dyn Port>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let refuse = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse || self.wire.is_unplugged() {
            return Err(TransportError::Open {
                port: name.to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        Ok(Box::new(MockPort {
            wire: self.wire.clone(),
            name: name.to_string(),
        }))
    }
}
