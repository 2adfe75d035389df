use std::io::{self, Read, Write};

use serialport::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits,
};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{Port, PortDescriptor, PortKind, PortProvider, PortSettings};

/// Ports provided by the operating system through the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortProvider for SystemPorts {
    fn list(&self) -> Result<Vec<PortDescriptor>> {
        let ports = serialport::available_ports()
            .map_err(|err| TransportError::Enumerate(err.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|info| {
                let (kind, manufacturer, product) = match info.port_type {
                    SerialPortType::UsbPort(usb) => (PortKind::Usb, usb.manufacturer, usb.product),
                    SerialPortType::PciPort => (PortKind::Pci, None, None),
                    SerialPortType::BluetoothPort => (PortKind::Bluetooth, None, None),
                    SerialPortType::Unknown => (PortKind::Unknown, None, None),
                };
                PortDescriptor {
                    name: info.port_name,
                    kind,
                    manufacturer,
                    product,
                }
            })
            .collect())
    }

    fn open(&self, name: &str, settings: &PortSettings) -> Result<Box<dyn Port>> {
        let port = serialport::new(name, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|err| TransportError::Open {
                port: name.to_string(),
                source: err.into(),
            })?;
        debug!(port = %name, baud = settings.baud_rate, "serial port opened");
        Ok(Box::new(SerialDevice { inner: port }))
    }
}

/// A port opened through the `serialport` crate.
pub struct SerialDevice {
    inner: Box<dyn SerialPort>,
}

impl Read for SerialDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for SerialDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Port for SerialDevice {
    fn bytes_to_read(&self) -> io::Result<u32> {
        self.inner.bytes_to_read().map_err(Into::into)
    }

    fn discard_input(&self) -> io::Result<()> {
        self.inner.clear(ClearBuffer::Input).map_err(Into::into)
    }

    fn try_clone_port(&self) -> io::Result<Box<dyn Port>> {
        let inner = self.inner.try_clone()?;
        Ok(Box::new(SerialDevice { inner }))
    }

    fn name(&self) -> Option<String> {
        self.inner.name()
    }
}

impl std::fmt::Debug for SerialDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDevice")
            .field("name", &self.inner.name())
            .finish()
    }
}
