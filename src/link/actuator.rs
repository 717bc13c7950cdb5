//! actuator.rs
//! Serial link to the pressure microcontroller.
//!
//! One request is outstanding at a time and every wait carries a deadline:
//! the setup banner (`LinkTimeouts::setup`) and each acknowledgment or reading
//! (`LinkTimeouts::response`). A timed-out exchange marks the link dirty so the
//! next request starts from an empty input buffer instead of consuming a late reply.
//!
//! `close()` returns every enabled channel to the default near-atmospheric pressure.
//! It is idempotent and also runs from `Drop`, so the actuator is de-pressurised on
//! every exit path before the serial handle is released.

use log::{debug, error, info, warn};
use std::{
    thread,
    time::{Duration, Instant},
};

use crate::control::state::{Channel, ChannelMask, PressureValue};
use crate::error::{Error, Result};
use crate::link::codec::{self, LineBuffer, Request, ResponseKind};
use crate::link::transport::{find_port, SerialTransport, Transport};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Deadlines applied by the link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkTimeouts {
    /// Quiet period after opening while the microcontroller initialises its sensors.
    pub settle: Duration,
    /// Maximum wait for the setup banner once the settle period is over.
    pub setup: Duration,
    /// Maximum wait for an acknowledgment or a pressure reading.
    pub response: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(10),
            setup: Duration::from_secs(5),
            response: Duration::from_millis(500),
        }
    }
}

pub struct ActuatorLink<T: Transport> {
    transport: T,
    lines: LineBuffer,
    enabled: ChannelMask,
    timeouts: LinkTimeouts,
    dirty: bool,
    closed: bool,
}

impl ActuatorLink<SerialTransport> {
    /// Opens `port`, waits out the settle period and the setup banner.
    pub fn open(port: &str, baud_rate: u32, timeouts: LinkTimeouts) -> Result<Self> {
        let transport = SerialTransport::open(port, baud_rate)
            .map_err(|e| Error::LinkUnavailable(format!("{}: {}", port, e)))?;
        Self::establish(transport, timeouts)
    }

    /// Like `open`, on the first port matching `hint`.
    pub fn discover(hint: &str, baud_rate: u32, timeouts: LinkTimeouts) -> Result<Self> {
        let port = find_port(hint)?;
        info!("Found actuator controller on {}", port);
        Self::open(&port, baud_rate, timeouts)
    }
}

impl<T: Transport> ActuatorLink<T> {
    pub fn establish(transport: T, timeouts: LinkTimeouts) -> Result<Self> {
        let mut link = Self {
            transport,
            lines: LineBuffer::new(),
            enabled: ChannelMask::default(),
            timeouts,
            dirty: false,
            closed: false,
        };

        if !timeouts.settle.is_zero() {
            info!("Waiting {:?} for microcontroller initialisation...", timeouts.settle);
            thread::sleep(timeouts.settle);
        }

        link.await_banner()?;
        info!("Actuator serial link established");
        Ok(link)
    }

    pub fn enabled_channels(&self) -> ChannelMask {
        self.enabled
    }

    pub fn timeouts(&self) -> LinkTimeouts {
        self.timeouts
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Switches channels on or off and waits for the acknowledgment.
    pub fn enable_channels(&mut self, mask: ChannelMask) -> Result<()> {
        self.ensure_open()?;
        // Recorded before the ack so close() still covers a half-applied enable.
        self.enabled = mask;
        let line = self.exchange(Request::EnableChannels(mask))?;
        self.check(codec::decode_ack(&line))?;
        info!("Enabled channels {:?}", mask.enabled().collect::<Vec<_>>());
        Ok(())
    }

    /// Current pressure on `channel` in psi. A garbled reading is re-requested once.
    pub fn read_pressure(&mut self, channel: Channel) -> Result<f64> {
        self.ensure_open()?;
        match self.read_pressure_once(channel) {
            Err(Error::ProtocolDecode(msg)) => {
                warn!("Channel {} reading garbled ({}); retrying once", channel, msg);
                self.read_pressure_once(channel)
            }
            other => other,
        }
    }

    pub fn write_desired_pressure(&mut self, channel: Channel, value: PressureValue) -> Result<()> {
        self.ensure_open()?;
        self.send_pressure(channel, value)
    }

    /// De-pressurises every enabled channel. Safe to call more than once; only the
    /// first call talks to the device. Every channel is attempted even if one fails.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let default = PressureValue::default_pressure();
        let mut first_err = None;
        let mask = self.enabled;
        for channel in mask.enabled() {
            match self.send_pressure(channel, default) {
                Ok(()) => info!("Channel {} returned to {}", channel, default),
                Err(e) => {
                    error!("Failed to return channel {} to {}: {}", channel, default, e);
                    first_err.get_or_insert(e);
                }
            }
        }

        if let Err(e) = self.transport.flush() {
            error!("Flush on close failed: {}", e);
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::LinkUnavailable("link already closed".into()))
        } else {
            Ok(())
        }
    }

    fn read_pressure_once(&mut self, channel: Channel) -> Result<f64> {
        let line = self.exchange(Request::ReadPressure(channel))?;
        self.check(codec::decode_pressure(&line))
    }

    fn send_pressure(&mut self, channel: Channel, value: PressureValue) -> Result<()> {
        let line = self.exchange(Request::WritePressure(channel, value))?;
        self.check(codec::decode_ack(&line))
    }

    /// One request/response round trip.
    fn exchange(&mut self, request: Request) -> Result<String> {
        if self.dirty {
            self.transport.clear_input()?;
            self.lines.clear();
            self.dirty = false;
        }

        let frame = request.encode();
        debug!("-> {}", frame);
        self.transport.write_all(frame.as_bytes())?;
        self.transport.flush()?;

        let line = self.await_line(request.awaited(), self.timeouts.response)?;
        debug!("<- {}", line.trim_end());
        Ok(line)
    }

    fn check<V>(&mut self, decoded: Result<V>) -> Result<V> {
        if decoded.is_err() {
            self.dirty = true;
        }
        decoded
    }

    fn await_banner(&mut self) -> Result<()> {
        let setup = self.timeouts.setup;
        let deadline = Instant::now() + setup;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.await_line(ResponseKind::SetupBanner, remaining) {
                Ok(line) if codec::is_setup_banner(&line) => return Ok(()),
                Ok(line) => debug!("pre-setup output: {}", line.trim_end()),
                Err(Error::ProtocolTimeout { .. }) => {
                    return Err(Error::LinkUnavailable(format!(
                        "no setup banner within {:?}",
                        setup
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Blocks until a complete line long enough for `kind` is buffered or the
    /// deadline passes. Partial input is discarded on timeout.
    fn await_line(&mut self, kind: ResponseKind, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 64];

        loop {
            while let Some(line) = self.lines.next_line() {
                if line.len() >= kind.min_len() {
                    return Ok(line);
                }
                debug!("discarding short line {:?} while awaiting {}", line, kind.name());
            }

            if Instant::now() >= deadline {
                self.lines.clear();
                self.dirty = true;
                return Err(Error::ProtocolTimeout { awaited: kind.name(), timeout });
            }

            let n = self.transport.read(&mut chunk)?;
            if n > 0 {
                self.lines.extend(&chunk[..n]);
            }
        }
    }
}

impl<T: Transport> Drop for ActuatorLink<T> {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Actuator link dropped without close; de-pressurising");
            if let Err(e) = self.close() {
                error!("De-pressurisation on drop failed: {}", e);
            }
        }
    }
}
