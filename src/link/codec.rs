//! codec.rs
//! ASCII request/response protocol spoken by the pressure microcontroller.
//!
//! Requests are bare ASCII written in one piece (`sc100`, `c0read`, `c01225`).
//! Responses are lines: the `rx` acknowledgment, a decimal pressure reading, or the
//! one-time setup banner. `LineBuffer` collects bytes until a full line is present.

use std::fmt;

use crate::control::state::{Channel, ChannelMask, PressureValue};
use crate::error::{Error, Result};

/// Acknowledgment token sent after an enable or write request.
pub const ACK_TOKEN: &str = "rx";
/// `rx\r\n`
pub const ACK_LEN: usize = 4;
pub const SETUP_BANNER: &str = "Arduino Setup Complete";
/// Banner plus delimiter.
pub const SETUP_BANNER_LEN: usize = 23;
/// A pressure line carries more than four bytes (`12.25\r\n`).
pub const PRESSURE_MIN_LEN: usize = 5;

const MAX_LINE_LEN: usize = 256;

/// Host → device request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    EnableChannels(ChannelMask),
    ReadPressure(Channel),
    WritePressure(Channel, PressureValue),
}

impl Request {
    pub fn encode(&self) -> String {
        match self {
            Request::EnableChannels(mask) => {
                let [c0, c1, c2] = mask.flags();
                format!("sc{}{}{}", c0 as u8, c1 as u8, c2 as u8)
            }
            Request::ReadPressure(channel) => format!("c{}read", channel),
            Request::WritePressure(channel, value) => {
                format!("c{}{}", channel, encode_pressure(*value))
            }
        }
    }

    /// Response kind the device answers this request with.
    pub fn awaited(&self) -> ResponseKind {
        match self {
            Request::EnableChannels(_) | Request::WritePressure(..) => ResponseKind::Ack,
            Request::ReadPressure(_) => ResponseKind::Pressure,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Fixed four digits, implied decimal point after the second: 9.5 → `0950`.
pub fn encode_pressure(value: PressureValue) -> String {
    format!("{:04}", value.centi_psi())
}

/// Device → host response kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Ack,
    Pressure,
    SetupBanner,
}

impl ResponseKind {
    /// Bytes (delimiter included) that must be present before decoding is attempted.
    pub fn min_len(self) -> usize {
        match self {
            ResponseKind::Ack => ACK_LEN,
            ResponseKind::Pressure => PRESSURE_MIN_LEN,
            ResponseKind::SetupBanner => SETUP_BANNER_LEN,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ResponseKind::Ack => "ack",
            ResponseKind::Pressure => "pressure",
            ResponseKind::SetupBanner => "setup banner",
        }
    }
}

pub fn decode_ack(line: &str) -> Result<()> {
    if line.trim_end() == ACK_TOKEN {
        Ok(())
    } else {
        Err(Error::ProtocolDecode(format!("expected ack, got {:?}", line.trim_end())))
    }
}

pub fn decode_pressure(line: &str) -> Result<f64> {
    let text = line.trim();
    match text.parse::<f64>() {
        Ok(psi) if psi.is_finite() => Ok(psi),
        _ => Err(Error::ProtocolDecode(format!("not a pressure reading: {:?}", text))),
    }
}

pub fn is_setup_banner(line: &str) -> bool {
    line.trim_end() == SETUP_BANNER
}

/// Accumulates raw bytes and hands out complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(64) }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        // A runaway line without delimiter is noise; keep the tail only.
        if self.buf.len() > MAX_LINE_LEN && !self.buf.contains(&b'\n') {
            let excess = self.buf.len() - MAX_LINE_LEN;
            self.buf.drain(..excess);
        }
    }

    /// Next complete line including its delimiter, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Newest complete line, discarding older ones.
    pub fn last_line(&mut self) -> Option<String> {
        let mut last = None;
        while let Some(line) = self.next_line() {
            last = Some(line);
        }
        last
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_requests_use_four_digit_pressure() {
        let cases = [
            (Channel::C0, 9.50, "c00950"),
            (Channel::C1, 12.3, "c11230"),
            (Channel::C2, 13.25, "c21325"),
        ];
        for (ch, psi, expected) in cases {
            let req = Request::WritePressure(ch, PressureValue::clamped(psi));
            assert_eq!(req.encode(), expected);
        }
    }

    #[test]
    fn write_request_never_leaves_hardware_range() {
        let high = Request::WritePressure(Channel::C0, PressureValue::clamped(30.0));
        let low = Request::WritePressure(Channel::C0, PressureValue::clamped(1.0));
        assert_eq!(high.encode(), "c01325");
        assert_eq!(low.encode(), "c00900");
    }

    #[test]
    fn enable_and_read_requests() {
        let enable = Request::EnableChannels(ChannelMask::new(true, false, false));
        assert_eq!(enable.encode(), "sc100");
        assert_eq!(Request::EnableChannels(ChannelMask::new(false, true, true)).encode(), "sc011");
        assert_eq!(Request::ReadPressure(Channel::C2).encode(), "c2read");
        assert_eq!(enable.awaited(), ResponseKind::Ack);
        assert_eq!(Request::ReadPressure(Channel::C0).awaited(), ResponseKind::Pressure);
    }

    #[test]
    fn response_lengths_match_wire_format() {
        assert_eq!("rx\r\n".len(), ResponseKind::Ack.min_len());
        assert_eq!(format!("{}\n", SETUP_BANNER).len(), ResponseKind::SetupBanner.min_len());
    }

    #[test]
    fn decodes_ack_and_pressure() {
        assert!(decode_ack("rx\r\n").is_ok());
        assert!(decode_ack("xx\r\n").is_err());
        assert_eq!(decode_pressure("12.25\r\n").unwrap(), 12.25);
        assert!(matches!(decode_pressure("12.2a\r\n"), Err(Error::ProtocolDecode(_))));
        assert!(decode_pressure("nan\r\n").is_err());
        assert!(is_setup_banner("Arduino Setup Complete\r\n"));
        assert!(!is_setup_banner("Initialising sensors\r\n"));
    }

    #[test]
    fn line_buffer_waits_for_delimiter() {
        let mut lines = LineBuffer::new();
        lines.extend(b"12.");
        assert_eq!(lines.next_line(), None);
        lines.extend(b"50\r\nrx");
        assert_eq!(lines.next_line().as_deref(), Some("12.50\r\n"));
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.len(), 2);
        lines.extend(b"\r\n");
        assert_eq!(lines.next_line().as_deref(), Some("rx\r\n"));
        assert!(lines.is_empty());
    }

    #[test]
    fn last_line_skips_stale_samples() {
        let mut lines = LineBuffer::new();
        lines.extend(b"41.0\n42.0\n43.5\n44");
        assert_eq!(lines.last_line().as_deref(), Some("43.5\n"));
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn undelimited_noise_is_bounded() {
        let mut lines = LineBuffer::new();
        lines.extend(&[b'x'; 1_000]);
        assert!(lines.len() <= 256);
    }
}
