//! transport.rs
//! Byte transport underneath the actuator link and the tracker bridge.
//!
//! Reads block for at most one short slice and report 0 bytes on timeout, so callers
//! can enforce their own response deadline instead of spinning on `bytes_to_read`.

use log::{debug, info, warn};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::{
    io::{ErrorKind, Read, Write},
    time::Duration,
};

use crate::error::{Error, Result};

/// Upper bound for a single blocking read.
pub const READ_SLICE: Duration = Duration::from_millis(10);

pub trait Transport: Send {
    /// Read into `buf`; `Ok(0)` when nothing arrived within one read slice.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Drop unread input (stale bytes from an abandoned exchange).
    fn clear_input(&mut self) -> Result<()> {
        Ok(())
    }
}

/// UART transport backed by `serialport`.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialTransport {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_SLICE)
            .open()?;

        info!("Opened serial port: {} at {} baud", path, baud_rate);
        Ok(Self { port, name: path.to_string() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.port.flush()?;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        debug!("Released serial port {}", self.name);
    }
}

/// First serial port whose name, USB product or manufacturer contains `hint`.
pub fn find_port(hint: &str) -> Result<String> {
    let ports = serialport::available_ports()?;
    let needle = hint.to_lowercase();

    let matches: Vec<String> = ports
        .into_iter()
        .filter(|p| {
            let described = match &p.port_type {
                SerialPortType::UsbPort(usb) => [usb.product.as_deref(), usb.manufacturer.as_deref()]
                    .into_iter()
                    .flatten()
                    .any(|s| s.to_lowercase().contains(&needle)),
                _ => false,
            };
            described || p.port_name.to_lowercase().contains(&needle)
        })
        .map(|p| p.port_name)
        .collect();

    match matches.as_slice() {
        [] => Err(Error::DeviceNotFound(hint.to_string())),
        [only] => Ok(only.clone()),
        [first, ..] => {
            warn!("Multiple devices match '{}' ({:?}); using {}", hint, matches, first);
            Ok(first.clone())
        }
    }
}
