use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// An open byte-stream port to the charge controller.
///
/// Reads honour the timeout the port was opened with. The link layer only
/// reads when [`Port::bytes_to_read`] reports pending input, so a read never
/// parks a caller for the full timeout in normal operation.
pub trait Port: Read + Write + Send {
    /// Number of received bytes waiting in the input buffer.
    fn bytes_to_read(&self) -> io::Result<u32>;

    /// Drop everything currently waiting in the input buffer.
    fn discard_input(&self) -> io::Result<()>;

    /// Open a second handle onto the same device.
    ///
    /// Used to split the port into an independently locked reader and writer.
    fn try_clone_port(&self) -> io::Result<Box<dyn Port>>;

    /// Device name, when the backend knows it.
    fn name(&self) -> Option<String> {
        None
    }
}

/// Enumerates and opens ports.
pub trait PortProvider: Send + Sync {
    /// List the ports currently visible to the system.
    fn list(&self) -> Result<Vec<PortDescriptor>>;

    /// Open the named port.
    fn open(&self, name: &str, settings: &PortSettings) -> Result<Box<dyn Port>>;
}

/// Line settings used when opening a port. The frame format is always 8N1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// What kind of bus a port hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortKind::Usb => "usb",
            PortKind::Pci => "pci",
            PortKind::Bluetooth => "bluetooth",
            PortKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// An enumerated port and whatever the OS told us about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: String,
    pub kind: PortKind,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl PortDescriptor {
    /// A descriptor carrying nothing but a device name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Unknown,
            manufacturer: None,
            product: None,
        }
    }

    /// Everything known about the port, lowercased, for keyword matching.
    pub fn search_text(&self) -> String {
        let mut text = format!("{} {}", self.name, self.kind);
        for part in [&self.manufacturer, &self.product].into_iter().flatten() {
            text.push(' ');
            text.push_str(part);
        }
        text.to_lowercase()
    }
}

/// Keywords that identify a USB-serial bridge in a port descriptor.
pub const DEFAULT_PORT_KEYWORDS: &[&str] = &[
    "usb", "acm", "serial", "ch340", "ch341", "cp210", "ftdi", "pl2303", "arduino",
];

/// Pick the first port whose descriptor contains one of `keywords`
/// (case-insensitive).
pub fn select_port<'a, S: AsRef<str>>(
    ports: &'a [PortDescriptor],
    keywords: &[S],
) -> Option<&'a PortDescriptor> {
    ports.iter().find(|port| {
        let text = port.search_text();
        keywords
            .iter()
            .any(|keyword| text.contains(&keyword.as_ref().to_lowercase()))
    })
}
